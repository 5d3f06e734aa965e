use std::io;

use rlimit::Resource;
use tracing::info;

/// Increase the file descriptor limit to the given minimum.
///
/// Errors if the hard limit is too low, otherwise raises the soft limit to the hard limit.
pub fn increase_nofile_limit(min_limit: u64) -> io::Result<u64> {
    let (soft, hard) = Resource::NOFILE.get()?;
    info!(soft, hard, "file descriptor limit at startup");

    if hard < min_limit {
        return Err(io::Error::other(format!(
            "file descriptor hard limit {hard} is too low, increase it to at least {min_limit}"
        )));
    }

    if soft != hard {
        Resource::NOFILE.set(hard, hard)?; // Just max things out to give us plenty of overhead.
        let (soft, hard) = Resource::NOFILE.get()?;
        info!(soft, hard, "increased file descriptor limit");
        return Ok(soft);
    }

    Ok(soft)
}

/// Merge two TOML values, with `overlay` taking precedence over `base`.
pub fn merge_toml_values(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_value) in overlay_table {
                match base_table.remove(&key) {
                    Some(base_value) if base_value.is_table() && overlay_value.is_table() => {
                        // Recursively merge nested tables
                        base_table.insert(key, merge_toml_values(base_value, overlay_value));
                    }
                    _ => {
                        base_table.insert(key, overlay_value);
                    }
                }
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay, // For non-table values, overlay completely replaces base.
    }
}

/// Left-pad a number with zeros, e.g. `zero_pad(7, 5) == "00007"`.
pub fn zero_pad(num: u64, places: usize) -> String {
    format!("{num:0places$}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_replaces_scalars_and_recurses_into_tables() {
        let base: toml::Value = toml::from_str("a = 1\n[t]\nx = 1\ny = 2\n").unwrap();
        let overlay: toml::Value = toml::from_str("a = 5\n[t]\ny = 9\n[u]\nz = 3\n").unwrap();

        let merged = merge_toml_values(base, overlay);

        assert_eq!(merged["a"].as_integer(), Some(5));
        assert_eq!(merged["t"]["x"].as_integer(), Some(1));
        assert_eq!(merged["t"]["y"].as_integer(), Some(9));
        assert_eq!(merged["u"]["z"].as_integer(), Some(3));
    }

    #[test]
    fn zero_pad_widths() {
        assert_eq!(zero_pad(7, 5), "00007");
        assert_eq!(zero_pad(123456, 5), "123456");
    }
}
