pub mod validation;

pub use validation::{path_id, validated_json, validated_query};
