pub mod list_chunk;
