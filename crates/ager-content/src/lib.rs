//! ager-content: generated wellness and chat content.
//!
//! Builds prompts for an external generative service, talks to it over
//! HTTP, and turns its free-form replies into validated, repaired
//! structures. Nothing here fabricates content: a reply that cannot be
//! repaired is an error.

pub mod analysis;
pub mod cache;
pub mod chat;
pub mod diet;
pub mod error;
pub mod extract;
pub mod gemini;
pub mod images;
pub mod prompt;
pub mod service;
pub mod wellness;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use cache::{fingerprint, CacheKey, DedupCache};
pub use chat::{ChatRequest, ChatTurn, Speaker};
pub use diet::{BmiBand, DietPlan, DietProfile, Medication};
pub use error::{ContentError, ServiceError};
pub use gemini::GeminiClient;
pub use images::{GoogleCseSearch, ImageResolver, ImageSearch, UnsplashSearch};
pub use prompt::Nonce;
pub use service::{GenerationConfig, GenerationRequest, GenerativeService, InlineImage};
pub use wellness::{Article, Product, WellnessContent, WellnessGenerator};
