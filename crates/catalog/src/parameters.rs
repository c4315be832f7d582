use surfacemap_core::{ConsolidatedParameter, RawParameter};

/// Fold one raw parameter occurrence into an endpoint's parameter list.
///
/// Example values are deduplicated and capped at `max_examples`; a distinct
/// value arriving after the cap marks the parameter as truncated.
pub fn record_parameter(
    params: &mut Vec<ConsolidatedParameter>,
    raw: &RawParameter,
    max_examples: usize,
) {
    if raw.name.is_empty() {
        return;
    }

    match params
        .iter_mut()
        .find(|p| p.location == raw.location && p.name == raw.name)
    {
        Some(existing) => {
            existing.frequency += 1;
            if let Some(value) = raw.example_value.as_deref() {
                add_example(existing, value, max_examples);
            }
        }
        None => {
            let mut param = ConsolidatedParameter {
                location: raw.location,
                name: raw.name.clone(),
                example_values: Vec::new(),
                frequency: 1,
                values_truncated: false,
            };
            if let Some(value) = raw.example_value.as_deref() {
                add_example(&mut param, value, max_examples);
            }
            params.push(param);
        }
    }
}

fn add_example(param: &mut ConsolidatedParameter, value: &str, max_examples: usize) {
    if param.example_values.iter().any(|v| v == value) {
        return;
    }
    if param.example_values.len() < max_examples {
        param.example_values.push(value.to_string());
    } else {
        param.values_truncated = true;
    }
}

/// Stable output order: location, then name.
pub fn sort_parameters(params: &mut [ConsolidatedParameter]) {
    params.sort_by(|a, b| (a.location, &a.name).cmp(&(b.location, &b.name)));
}
