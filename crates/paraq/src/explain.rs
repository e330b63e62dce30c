use std::collections::BTreeMap;
use std::fmt;

use paraq_error::{Result, ResultExt};
use serde::Serialize;

/// An entry in the output for explaining a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExplainEntry {
    /// Name of the operator.
    pub name: String,
    /// Items to display in the explain entry.
    ///
    /// Using a btree to ensure consistent ordering (mostly for test output).
    pub items: BTreeMap<String, ExplainValue>,
    /// Entries for the operator's inputs.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ExplainEntry>,
}

impl ExplainEntry {
    pub fn new(name: impl Into<String>) -> Self {
        ExplainEntry {
            name: name.into(),
            items: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    /// Put a value in the explain entry.
    pub fn with_value(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        self.items
            .insert(key.into(), ExplainValue::Value(value.to_string()));
        self
    }

    /// Put a list of values in the explain entry.
    pub fn with_values<S: fmt::Display>(
        mut self,
        key: impl Into<String>,
        values: impl IntoIterator<Item = S>,
    ) -> Self {
        let vals = ExplainValue::Values(values.into_iter().map(|s| s.to_string()).collect());
        self.items.insert(key.into(), vals);
        self
    }

    pub fn with_child(mut self, child: ExplainEntry) -> Self {
        self.children.push(child);
        self
    }

    /// Render this entry and all children, one per line, with children
    /// indented under their parent.
    pub fn render_tree(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out, 0);
        out
    }

    fn render_into(&self, out: &mut String, depth: usize) {
        for _ in 0..depth {
            out.push_str("  ");
        }
        out.push_str(&self.to_string());
        out.push('\n');
        for child in &self.children {
            child.render_into(out, depth + 1);
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize explain entry")
    }
}

impl fmt::Display for ExplainEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.items.is_empty() {
            write!(f, " (")?;
            for (idx, (k, v)) in self.items.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{k} = {v}")?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ExplainValue {
    Value(String),
    Values(Vec<String>),
}

impl fmt::Display for ExplainValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => write!(f, "{v}"),
            Self::Values(v) => write!(f, "[{}]", v.join(", ")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_single_line() {
        let ent = ExplainEntry::new("Filter")
            .with_value("ordinal_state", "Increasing")
            .with_values("partitions", [0, 1]);
        assert_eq!(
            "Filter (ordinal_state = Increasing, partitions = [0, 1])",
            ent.to_string()
        );
    }

    #[test]
    fn render_tree_indents_children() {
        let ent = ExplainEntry::new("Take")
            .with_value("count", 3)
            .with_child(ExplainEntry::new("Filter").with_child(ExplainEntry::new("ListSource")));

        let expected = "Take (count = 3)\n  Filter\n    ListSource\n";
        assert_eq!(expected, ent.render_tree());
    }

    #[test]
    fn json_contains_children() {
        let ent = ExplainEntry::new("Concat")
            .with_child(ExplainEntry::new("RangeSource"))
            .with_child(ExplainEntry::new("ListSource"));
        let json = ent.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!("Concat", value["name"]);
        assert_eq!("ListSource", value["children"][1]["name"]);
    }
}
