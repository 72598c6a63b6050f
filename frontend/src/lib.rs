pub mod decode;
pub mod opt;
pub mod translate;

pub use translate::Translator;
