//! Hardware diagnostics from `prtdiag`.

use serde::Serialize;

/// Command printing the hardware diagnostics of a host.
pub const DIAG_COMMAND: &str = "/usr/sbin/prtdiag";

/// System id reported when `prtdiag` has no configuration line.
pub const DEFAULT_SYSTEM_ID: &str = "(none)";

const SYSTEM_CONFIGURATION: &str = "System Configuration:";

/// Physical diagnostics of a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostDiagnostics {
    /// Vendor and model line.
    pub system_id: String,
    /// Number of empty memory slots.
    pub free_memory_banks: usize,
}

impl Default for HostDiagnostics {
    fn default() -> Self {
        Self {
            system_id: DEFAULT_SYSTEM_ID.to_string(),
            free_memory_banks: 0,
        }
    }
}

/// Parses `prtdiag` output. Never fails; unknown text yields the defaults.
#[must_use]
pub fn parse_diag(output: &str) -> HostDiagnostics {
    let system_id = output
        .lines()
        .find_map(|line| {
            let (_, rest) = line.split_once(SYSTEM_CONFIGURATION)?;
            Some(rest.trim().to_string())
        })
        .unwrap_or_else(|| DEFAULT_SYSTEM_ID.to_string());

    let free_memory_banks = output.lines().map(count_empty_dimms).sum();

    HostDiagnostics {
        system_id,
        free_memory_banks,
    }
}

/// Counts `empty ... DIMM <n>` occurrences on one line.
fn count_empty_dimms(line: &str) -> usize {
    let mut count = 0;
    let mut rest = line;

    while let Some(start) = rest.find("empty") {
        rest = &rest[start + "empty".len()..];

        let Some(slot) = next_dimm(rest) else {
            break;
        };
        count += 1;
        rest = &rest[slot..];
    }

    count
}

/// Returns the offset just past the next `DIMM <digits>` in `text`.
fn next_dimm(text: &str) -> Option<usize> {
    let mut offset = 0;

    while let Some(pos) = text[offset..].find("DIMM") {
        let after = offset + pos + "DIMM".len();
        let tail = &text[after..];
        let spaces = tail.len() - tail.trim_start().len();
        let digits = tail[spaces..]
            .bytes()
            .take_while(u8::is_ascii_digit)
            .count();

        if spaces > 0 && digits > 0 {
            return Some(after + spaces + digits);
        }
        offset = after;
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_diag() {
        let output = "\
System Configuration: Joyent Inc. 123
BIOS Configuration: American Megatrends Inc. 2.0a 09/13/2012

==== Memory Device Sockets ================================
Type           Status Set Device Locator      Bank Locator
-------------- ------ --- ------------------- ----------------
DDR3           in use 0   DIMM 1              P0_Node0_Channel0_Dimm0
other          empty  0   DIMM 2              P0_Node0_Channel0_Dimm1
DDR3           in use 0   DIMM 3              P0_Node0_Channel1_Dimm0
other          empty  0   DIMM 4              P0_Node0_Channel1_Dimm1
";

        let diag = parse_diag(output);

        assert_eq!(
            diag,
            HostDiagnostics {
                system_id: "Joyent Inc. 123".to_string(),
                free_memory_banks: 2,
            }
        );
    }

    #[test]
    fn test_unknown_text_yields_defaults() {
        assert_eq!(parse_diag("prtdiag: not supported"), HostDiagnostics::default());
        assert_eq!(parse_diag(""), HostDiagnostics::default());
    }

    #[test]
    fn test_count_empty_dimms() {
        assert_eq!(count_empty_dimms("empty DIMM 1 empty DIMM 2"), 2);
        assert_eq!(count_empty_dimms("empty  0   DIMMx DIMM 7"), 1);
        assert_eq!(count_empty_dimms("in use 0 DIMM 1"), 0);
        assert_eq!(count_empty_dimms("DIMM 1 empty"), 0);
        assert_eq!(count_empty_dimms("empty DIMM"), 0);
    }

    #[test]
    fn test_tab_separated_slot() {
        assert_eq!(count_empty_dimms("empty\t0\tDIMM\t3"), 1);
        assert_eq!(count_empty_dimms("empty DIMM \t 4 empty DIMM\t5"), 2);
    }
}
