pub mod allocation;
pub mod context;
pub mod dedup;
pub mod doc_id;
pub mod fusion;
pub mod prompt;
pub mod records;
pub mod request;
pub mod routing;
pub mod trace;
