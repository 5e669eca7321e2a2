use crate::error::ConfigError;

/// Flags consulted throughout lowering (§6.3: "other feature flags read
/// from `Basic_config`").
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BasicConfig {
    pub show_loc: bool,
    pub debug: bool,
    pub use_js_builtin_string: bool,
}

/// The two keys recognized in `MOONC_INTERNAL_PARAMS` (§6.3).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InternalParams {
    pub plain_wat: bool,
    pub dedup_wasm: bool,
}

/// Parses `k=v,k=v|k=v` (pre-group `|` post-group) into `InternalParams`.
/// Both groups share the same key set; a key present in either group sets
/// the corresponding flag. Unknown keys are fatal (§7.3).
pub fn parse_internal_params(raw: &str) -> Result<InternalParams, ConfigError> {
    let mut params = InternalParams::default();

    for group in raw.split('|') {
        if group.is_empty() {
            continue;
        }
        for entry in group.split(',') {
            if entry.is_empty() {
                continue;
            }
            let (key, value) = entry.split_once('=').ok_or_else(|| {
                ConfigError::MissingKeyValueSeparator {
                    group: entry.to_string(),
                }
            })?;
            let flag = parse_bool_flag(key, value)?;
            match key {
                "plain_wat" => params.plain_wat = flag,
                "dedup_wasm" => params.dedup_wasm = flag,
                other => {
                    return Err(ConfigError::UnknownKey {
                        key: other.to_string(),
                    })
                }
            }
        }
    }

    Ok(params)
}

fn parse_bool_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value {
        "0" => Ok(false),
        "1" => Ok(true),
        _ => Err(ConfigError::InvalidBoolValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_groups() {
        let params = parse_internal_params("plain_wat=1|dedup_wasm=1").unwrap();
        assert!(params.plain_wat);
        assert!(params.dedup_wasm);
    }

    #[test]
    fn parses_single_group_multiple_keys() {
        let params = parse_internal_params("plain_wat=1,dedup_wasm=0").unwrap();
        assert!(params.plain_wat);
        assert!(!params.dedup_wasm);
    }

    #[test]
    fn rejects_unknown_key() {
        let err = parse_internal_params("frobnicate=1").unwrap_err();
        assert_eq!(
            err,
            ConfigError::UnknownKey {
                key: "frobnicate".to_string()
            }
        );
    }

    #[test]
    fn rejects_missing_separator() {
        let err = parse_internal_params("plain_wat").unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingKeyValueSeparator {
                group: "plain_wat".to_string()
            }
        );
    }

    #[test]
    fn empty_string_is_all_defaults() {
        assert_eq!(parse_internal_params("").unwrap(), InternalParams::default());
    }
}
