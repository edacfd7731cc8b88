/// Separator used between byte pairs in a canonical card identifier
pub const UID_SEPARATOR: char = ':';

/// Format bytes as a hex string
pub fn format_hex(bytes: &[u8]) -> String {
    hex::encode_upper(bytes)
}

/// Format bytes as a hex string with spaces
pub fn format_hex_spaced(bytes: &[u8]) -> String {
    format_hex_separated(bytes, " ")
}

/// Canonical identifier form of a card UID, e.g. `04:A2:3C:5D`.
///
/// Pure function of the input bytes: uppercase pairs joined by [`UID_SEPARATOR`].
pub fn format_uid(bytes: &[u8]) -> String {
    format_hex_separated(bytes, &UID_SEPARATOR.to_string())
}

fn format_hex_separated(bytes: &[u8], separator: &str) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(separator)
}

/// Timestamp prefix for status lines printed to stdout
pub fn status_timestamp() -> String {
    chrono::Local::now()
        .format("%Y-%m-%dT%H:%M:%S%.6f")
        .to_string()
}

/// Get a human-readable description of SW1/SW2 status words
pub fn describe_status_word(sw1: u8, sw2: u8) -> String {
    match (sw1, sw2) {
        (0x90, 0x00) => "Success".to_string(),
        (0x61, n) => format!("Success, {n} bytes available"),
        (0x62, 0x81) => "Warning: Part of returned data may be corrupted".to_string(),
        (0x62, 0x82) => "Warning: End of file reached".to_string(),
        (0x63, 0x00) => "Warning: No information given".to_string(),
        (0x64, 0x00) => "Error: Execution error".to_string(),
        (0x65, 0x81) => "Error: Memory failure".to_string(),
        (0x67, 0x00) => "Error: Wrong length".to_string(),
        (0x68, 0x00) => "Error: Functions in CLA not supported".to_string(),
        (0x69, 0x82) => "Error: Security status not satisfied".to_string(),
        (0x69, 0x85) => "Error: Conditions of use not satisfied".to_string(),
        (0x6A, 0x81) => "Error: Function not supported".to_string(),
        (0x6A, 0x82) => "Error: File not found".to_string(),
        (0x6A, 0x86) => "Error: Incorrect parameters P1-P2".to_string(),
        (0x6B, 0x00) => "Error: Wrong parameter(s) P1-P2".to_string(),
        (0x6C, n) => format!("Error: Wrong Le field, exact length: {n}"),
        (0x6D, 0x00) => "Error: Instruction code not supported or invalid".to_string(),
        (0x6E, 0x00) => "Error: Class not supported".to_string(),
        (0x6F, 0x00) => "Error: No precise diagnosis".to_string(),
        _ => format!("Unknown status: {sw1:02X} {sw2:02X}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_uid() {
        assert_eq!(format_uid(&[0x04, 0xA2, 0x3C, 0x5D]), "04:A2:3C:5D");
        assert_eq!(format_uid(&[0xAA, 0xBB]), "AA:BB");
        assert_eq!(format_uid(&[0x0F]), "0F");
        assert_eq!(format_uid(&[]), "");
    }

    #[test]
    fn test_format_uid_is_deterministic() {
        let samples: Vec<Vec<u8>> = vec![
            vec![0x00],
            vec![0xFF, 0x00, 0x7F, 0x80],
            (0..=255).collect(),
            vec![0x04, 0xA2, 0x3C, 0x5D, 0x11, 0x22, 0x80],
        ];

        for raw in samples {
            let first = format_uid(&raw);
            assert_eq!(first, format_uid(&raw.clone()));
            // Two hex digits per byte plus one separator between pairs
            assert_eq!(first.len(), raw.len() * 3 - 1);
            assert_eq!(first.replace(UID_SEPARATOR, ""), format_hex(&raw));
        }
    }

    #[test]
    fn test_format_functions() {
        let bytes = vec![0x01, 0x02, 0x03, 0x0A];
        assert_eq!(format_hex(&bytes), "0102030A");
        assert_eq!(format_hex_spaced(&bytes), "01 02 03 0A");
        assert_eq!(format_hex_spaced(&[0xFF, 0xCA, 0x00, 0x00, 0x00]), "FF CA 00 00 00");

        assert_eq!(format_hex(&[]), "");
        assert_eq!(format_hex_spaced(&[]), "");
    }

    #[test]
    fn test_describe_status_word() {
        assert_eq!(describe_status_word(0x90, 0x00), "Success");
        assert_eq!(
            describe_status_word(0x61, 0x10),
            "Success, 16 bytes available"
        );
        assert_eq!(describe_status_word(0x6A, 0x82), "Error: File not found");
        assert_eq!(
            describe_status_word(0x6A, 0x81),
            "Error: Function not supported"
        );
        assert_eq!(
            describe_status_word(0x6C, 0x08),
            "Error: Wrong Le field, exact length: 8"
        );
        assert_eq!(describe_status_word(0x12, 0x34), "Unknown status: 12 34");
    }

    #[test]
    fn test_status_timestamp_shape() {
        let ts = status_timestamp();
        assert!(chrono::NaiveDateTime::parse_from_str(&ts, "%Y-%m-%dT%H:%M:%S%.6f").is_ok());
    }
}
