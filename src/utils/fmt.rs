/// Reduce a node address or metric label to the character set Icinga
/// accepts in perfdata labels.
pub fn sanitize_metric_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

pub fn bytes_to_gb(bytes: f64) -> f64 {
    (bytes / (1024.0 * 1024.0 * 1024.0) * 100.0).round() / 100.0
}
