pub mod chunking_strategy;
pub mod indexing_engine;
pub mod retriever;
pub mod vector_index;
