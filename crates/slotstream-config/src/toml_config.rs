use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::cut_config::CutConfig;

/// Build a `CutConfig` from a TOML string
pub fn from_toml_str(toml_str: &str) -> Result<CutConfig, Box<dyn std::error::Error>> {
    let cfg: CutConfig = toml::from_str(toml_str)?;

    // Various sanity checks
    if cfg.input.sample_rate <= 0.0 {
        return Err(format!("input.sample_rate must be positive, got {}", cfg.input.sample_rate).into());
    }
    if cfg.schedule.frame_len <= 0.0 {
        return Err(format!("schedule.frame_len must be positive, got {}", cfg.schedule.frame_len).into());
    }
    if cfg.schedule.slot_lens.len() != cfg.schedule.slot_offsets.len() {
        return Err(format!(
            "schedule.slot_lens and schedule.slot_offsets must have the same length ({} vs {})",
            cfg.schedule.slot_lens.len(),
            cfg.schedule.slot_offsets.len()
        )
        .into());
    }
    if cfg.schedule.slot_lens.iter().any(|&len| len <= 0.0) {
        return Err("schedule.slot_lens entries must be positive".into());
    }

    Ok(cfg)
}

/// Build a `CutConfig` from a TOML configuration file
pub fn from_file<P: AsRef<Path>>(path: P) -> Result<CutConfig, Box<dyn std::error::Error>> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut contents = String::new();
    reader.read_to_string(&mut contents)?;
    from_toml_str(&contents)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = r#"
        [input]
        file = "rx.iq"
        sample_rate = 1000.0
        start_int_s = 100

        [time]
        integer_offset = -1

        [schedule]
        frame_len = 1.0
        slot_lens = [0.1, 0.2]
        slot_offsets = [0.0, 0.5]

        [output]
        file = "cut.iq"

        [log]
        tag_file = "tags.log"
    "#;

    #[test]
    fn test_parse_example() {
        let cfg = from_toml_str(EXAMPLE).unwrap();
        assert_eq!(cfg.input.sample_rate, 1000.0);
        assert_eq!(cfg.input.start_time().int_s(), 100);
        assert_eq!(cfg.time.integer_offset, -1);
        assert_eq!(cfg.schedule.slot_lens.len(), 2);
        assert_eq!(cfg.schedule.frame_t0().int_s(), 0);
        assert_eq!(cfg.output.file, "cut.iq");
        assert!(cfg.log.is_some());
    }

    #[test]
    fn test_rejects_mismatched_slots() {
        let bad = EXAMPLE.replace("slot_offsets = [0.0, 0.5]", "slot_offsets = [0.0]");
        assert!(from_toml_str(&bad).is_err());
    }

    #[test]
    fn test_rejects_bad_rate() {
        let bad = EXAMPLE.replace("sample_rate = 1000.0", "sample_rate = -1.0");
        assert!(from_toml_str(&bad).is_err());
    }
}
