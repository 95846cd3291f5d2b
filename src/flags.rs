//! Advertising flags (AD type 0x01) decoding.

/// Flag bits with their labels, most significant defined bit first.
const FLAG_LABELS: [(u8, &str); 5] = [
    (0x10, "LE and BR/EDR Capable (Host)"),
    (0x08, "LE and BR/EDR Capable (Controller)"),
    (0x04, "BR/EDR Not Supported"),
    (0x02, "LE General Discoverable Mode"),
    (0x01, "LE Limited Discoverable Mode"),
];

/// Labels for every defined bit set in `flags`.
pub fn flag_labels(flags: u8) -> Vec<&'static str> {
    FLAG_LABELS
        .iter()
        .filter(|(bit, _)| flags & bit != 0)
        .map(|(_, label)| *label)
        .collect()
}

/// Human-readable description, `"None"` when the advertisement had no flags.
pub fn describe_flags(flags: Option<u8>) -> String {
    match flags {
        Some(flags) => flag_labels(flags).join(", "),
        None => "None".to_string(),
    }
}

/// `"Legacy"` or `"Extended"` advertising PDU.
pub fn pdu_label(is_legacy: bool) -> &'static str {
    if is_legacy { "Legacy" } else { "Extended" }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typical_le_only_flags() {
        assert_eq!(
            flag_labels(0x06),
            vec!["BR/EDR Not Supported", "LE General Discoverable Mode"]
        );
    }

    #[test]
    fn test_all_and_reserved_bits() {
        assert_eq!(flag_labels(0xFF).len(), 5);
        assert!(flag_labels(0xE0).is_empty());
        assert_eq!(describe_flags(Some(0xE0)), "");
    }

    #[test]
    fn test_describe() {
        assert_eq!(describe_flags(None), "None");
        assert_eq!(
            describe_flags(Some(0x1A)),
            "LE and BR/EDR Capable (Host), LE and BR/EDR Capable (Controller), LE General Discoverable Mode"
        );
        assert_eq!(pdu_label(true), "Legacy");
        assert_eq!(pdu_label(false), "Extended");
    }
}
