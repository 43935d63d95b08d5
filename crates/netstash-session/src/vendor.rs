//! Vendor profile table.
//!
//! Operators name vendors freely ("Cisco (ASA Firewall)", "mikrotik",
//! "Huawei OLT"), so resolution is a case-insensitive substring match over
//! the free-form vendor string. First matching row wins; anything
//! unrecognized degrades to the default show-running-config profile.
//! New vendors are new rows, never new branches.

use netstash_core::types::Protocol;

/// Everything the driver and normalizer need to know about one vendor
/// family: the config dump command, handshake quirks, and paging behavior.
#[derive(Debug, Clone, Copy)]
pub struct VendorProfile {
    /// Row label, also used in logs.
    pub family: &'static str,
    /// Configuration retrieval command.
    pub command: &'static str,
    /// Privileged-mode entry command; empty when the family has no
    /// enable concept.
    pub enable_command: &'static str,
    /// Graceful session exit command, tried before the socket close.
    pub exit_command: &'static str,
    /// Pagination banners, matched case-insensitively in the drain tail.
    pub paging_markers: &'static [&'static str],
    /// Keystroke that continues paginated output.
    pub continue_key: &'static [u8],
    /// Characters that terminate an interactive prompt line.
    pub prompt_terminators: &'static [char],
    /// Best-effort commands issued right after login (e.g. disable paging).
    pub on_open: &'static [&'static str],
}

const CISCO_PAGING: &[&str] = &["--more--", "-- more --", "--more--)"];
const GENERIC_PAGING: &[&str] = &["--more--", "---(more)---", "-- more --", "---- more ----"];
const PROMPT_CHARS: &[char] = &['#', '>', '$'];

/// (vendor substring needles, profile). Checked top to bottom.
const VENDOR_TABLE: &[(&[&str], VendorProfile)] = &[
    (
        &["mikrotik", "routeros", "switchos"],
        VendorProfile {
            family: "mikrotik",
            command: "/export",
            enable_command: "",
            exit_command: "/quit",
            paging_markers: &[],
            continue_key: b" ",
            prompt_terminators: &['>'],
            on_open: &[],
        },
    ),
    (
        &["juniper", "junos"],
        VendorProfile {
            family: "juniper",
            command: "show configuration | no-more",
            enable_command: "",
            exit_command: "exit",
            paging_markers: GENERIC_PAGING,
            continue_key: b" ",
            prompt_terminators: PROMPT_CHARS,
            on_open: &["set cli screen-length 0"],
        },
    ),
    (
        &["fortinet", "fortigate"],
        VendorProfile {
            family: "fortinet",
            command: "show",
            enable_command: "",
            exit_command: "exit",
            paging_markers: GENERIC_PAGING,
            continue_key: b" ",
            prompt_terminators: &['#', '$'],
            on_open: &["config system console", "set output standard", "end"],
        },
    ),
    (
        &["huawei", "smartax", "olt"],
        VendorProfile {
            family: "huawei",
            command: "display current-configuration",
            enable_command: "",
            exit_command: "quit",
            paging_markers: &["---- more ----", "--more--"],
            continue_key: b" ",
            prompt_terminators: &['>', '#', ']'],
            on_open: &["screen-length 0 temporary"],
        },
    ),
    (
        &["aruba"],
        VendorProfile {
            family: "aruba",
            command: "show running-config",
            enable_command: "enable",
            exit_command: "exit",
            paging_markers: GENERIC_PAGING,
            continue_key: b" ",
            prompt_terminators: PROMPT_CHARS,
            on_open: &["no page"],
        },
    ),
    (
        &["allied telesis", "awplus", "allied"],
        VendorProfile {
            family: "allied-telesis",
            command: "show running-config",
            enable_command: "enable",
            exit_command: "exit",
            paging_markers: CISCO_PAGING,
            continue_key: b" ",
            prompt_terminators: PROMPT_CHARS,
            on_open: &["terminal length 0"],
        },
    ),
    (
        &["cisco", "asa", "nxos", "wlc", "ios"],
        VendorProfile {
            family: "cisco",
            command: "show running-config",
            enable_command: "enable",
            exit_command: "exit",
            paging_markers: CISCO_PAGING,
            continue_key: b" ",
            prompt_terminators: PROMPT_CHARS,
            on_open: &["terminal length 0"],
        },
    ),
];

/// Fallback for anything the table does not recognize.
const DEFAULT_PROFILE: VendorProfile = VendorProfile {
    family: "generic",
    command: "show running-config",
    enable_command: "enable",
    exit_command: "exit",
    paging_markers: GENERIC_PAGING,
    continue_key: b" ",
    prompt_terminators: PROMPT_CHARS,
    on_open: &["terminal length 0"],
};

/// Total resolution: never fails, unknown vendors get the default profile.
/// Protocol is accepted for future per-transport overrides; today the
/// table is protocol-agnostic.
pub fn resolve(vendor: &str, _protocol: Protocol) -> VendorProfile {
    let needle_space = vendor.to_lowercase();
    for (needles, profile) in VENDOR_TABLE {
        if needles.iter().any(|n| needle_space.contains(n)) {
            return *profile;
        }
    }
    DEFAULT_PROFILE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mikrotik_resolves_to_export() {
        let p = resolve("MikroTik (RouterOS)", Protocol::Ssh);
        assert_eq!(p.command, "/export");
        assert_eq!(p.enable_command, "");
        assert_eq!(p.exit_command, "/quit");
    }

    #[test]
    fn test_unknown_vendor_gets_default() {
        let p = resolve("TotallyUnknownVendor", Protocol::Ssh);
        assert_eq!(p.command, "show running-config");
        assert_eq!(p.family, "generic");
    }

    #[test]
    fn test_resolution_is_case_insensitive_substring() {
        assert_eq!(resolve("HUAWEI (OLT)", Protocol::Telnet).family, "huawei");
        assert_eq!(resolve("juniper junos mx480", Protocol::Ssh).family, "juniper");
        assert_eq!(resolve("Cisco (ASA Firewall)", Protocol::Ssh).family, "cisco");
        assert_eq!(resolve("Fortinet (FortiGate)", Protocol::Ssh).command, "show");
    }

    #[test]
    fn test_first_row_wins() {
        // "mikrotik" row sits above "cisco"; a string mentioning both
        // resolves to the earlier row.
        let p = resolve("MikroTik running cisco-like CLI", Protocol::Ssh);
        assert_eq!(p.family, "mikrotik");
    }

    #[test]
    fn test_huawei_display_command() {
        let p = resolve("Huawei (SmartAX)", Protocol::Telnet);
        assert_eq!(p.command, "display current-configuration");
    }
}
