pub mod addr;
pub mod arena;
pub mod cli;
pub mod convert;
pub mod cro;
pub mod decode;
pub mod elf;
pub mod encode;
pub mod error;
pub mod layout;
pub mod resolver;
pub mod trie;

pub use convert::run;
pub use error::ConvertError;
