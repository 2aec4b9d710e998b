//! Model clients.
//!
//! `ModelClient` is the backend-agnostic contract; `OllamaModel` and
//! `OpenAiCompatModel` differ only in transport, auth, and how a `Schema`
//! becomes an output-format directive.

mod factory;
mod health;
pub(crate) mod model;
mod ollama;
mod openai;
mod schema;

pub use factory::*;
pub use health::*;
pub use model::{DEFAULT_CATEGORIZATION_BATCH_SIZE, ModelClient, generate_data};
pub use ollama::*;
pub use openai::*;
pub use schema::*;
