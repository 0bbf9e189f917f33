//! Shared utility functions for scene-forge.

pub mod json_extraction;

pub use json_extraction::{
    extract_from_code_block, extract_json_from_response, find_matching_delimiter,
    strip_code_fences, JsonExtractionError,
};
