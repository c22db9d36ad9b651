pub mod http;
pub mod local;
pub mod memory;

pub use http::HttpFigureSource;
pub use local::{LocalBlobStore, LocalFigureDir, LocalPageDir};
pub use memory::InMemoryQuestionRepository;
