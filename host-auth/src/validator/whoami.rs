//! Parser for `whoami /groups /priv /fo csv` output

use crate::auth::Privilege;
use once_cell::sync::Lazy;
use regex::Regex;

/// One CSV field at the start of the input: a double-quoted run with `""`
/// escapes, or else an unquoted run of non-comma characters, then a comma or
/// the end of the line. A quoted run not followed by a separator falls back
/// to the unquoted form, quotes included.
static CSV_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*(?:"((?:[^"]|"")*)"\s*|([^,]*))(,|$)"#).expect("CSV field pattern")
});

/// Split one CSV row into field values
pub fn parse_csv_row(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut rest = line;

    loop {
        let Some(caps) = CSV_FIELD.captures(rest) else {
            break;
        };
        let value = match (caps.get(1), caps.get(2)) {
            (Some(quoted), _) => quoted.as_str().replace("\"\"", "\""),
            (None, Some(bare)) => bare.as_str().to_string(),
            (None, None) => String::new(),
        };
        fields.push(value);

        let end = caps.get(0).map_or(rest.len(), |m| m.end());
        let more = caps.get(3).map_or(false, |sep| sep.as_str() == ",");
        if !more {
            break;
        }
        rest = &rest[end..];
    }

    fields
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Scanning,
    ReadingGroups,
    ReadingPrivileges,
}

/// Groups and privileges listed by `whoami`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WhoamiListing {
    pub groups: Vec<String>,
    pub privileges: Vec<Privilege>,
}

/// Walk the output line by line, collecting rows of the group and privilege
/// tables. Each table starts at its header row and ends at a blank line.
pub fn parse_whoami_output<'a>(lines: impl IntoIterator<Item = &'a str>) -> WhoamiListing {
    let mut listing = WhoamiListing::default();
    let mut section = Section::Scanning;

    for line in lines {
        let trimmed = line.trim();

        match section {
            Section::Scanning => {
                if trimmed.starts_with("\"Group Name") {
                    section = Section::ReadingGroups;
                } else if trimmed.starts_with("\"Privilege Name") {
                    section = Section::ReadingPrivileges;
                }
            }
            Section::ReadingGroups => {
                if trimmed.is_empty() {
                    section = Section::Scanning;
                    continue;
                }

                let mut fields = parse_csv_row(trimmed);
                if !fields.is_empty() {
                    listing.groups.push(fields.swap_remove(0));
                }
            }
            Section::ReadingPrivileges => {
                if trimmed.is_empty() {
                    section = Section::Scanning;
                    continue;
                }

                let fields = parse_csv_row(trimmed);
                if fields.len() >= 3 {
                    let granted = fields[2] == "Enabled";
                    listing.privileges.push(Privilege::new(fields[0].clone(), granted));
                }
            }
        }
    }

    listing
}
