mod decoder;
mod value;

pub use decoder::{decode, raw_dict_value, MAX_DEPTH};
pub use value::BencodeValue;
