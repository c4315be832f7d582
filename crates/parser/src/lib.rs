pub mod filters;
pub mod normalize;
pub mod segment;
pub mod sources;

pub use filters::{classify, FilterStats, Rejection};
pub use normalize::{
    extract_query_parameters, host_of, normalize, parse_lenient, path_segments, split_origin,
};
pub use segment::{is_all_digits, looks_like_identifier, looks_like_parameter_value, shannon_entropy};
pub use sources::{
    body_parameters, bruteforce_to_observations, capture_parameters, capture_to_observation,
    UrlListSource,
};
