//! Parsers for directory listings: machine-readable `MLSD` (RFC 3659)
//! and the free-form `LIST` output of Unix and DOS/IIS servers.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

use crate::files::utils::format_permissions;
use crate::files::{RemoteFile, RemotePath};

/// Parse one `MLSD` line, e.g. `type=file;size=12;modify=20240101120000; a.txt`.
///
/// Returns `None` for `cdir`/`pdir` entries and unparsable lines.
pub(crate) fn parse_mlsd_line(line: &str, parent: &RemotePath) -> Option<RemoteFile> {
    let line = line.trim_end_matches(['\r', '\n']);
    let (facts, name) = line.split_once(' ')?;
    if name.is_empty() || name == "." || name == ".." {
        return None;
    }

    let mut entry = RemoteFile::file(parent, name, None);
    for fact in facts.split(';').filter(|f| !f.is_empty()) {
        let Some((key, value)) = fact.split_once('=') else {
            continue;
        };
        match key.to_ascii_lowercase().as_str() {
            "type" => {
                let value = value.to_ascii_lowercase();
                match value.as_str() {
                    "cdir" | "pdir" => return None,
                    "dir" => entry.is_directory = true,
                    "file" => {}
                    v if v.starts_with("os.unix=slink") || v.starts_with("os.unix=symlink") => {
                        entry.is_symlink = true;
                    }
                    _ => {}
                }
            }
            "size" | "sizd" => entry.size = value.parse().ok(),
            "modify" => entry.modified_at = parse_mlsd_time(value),
            "unix.mode" => {
                entry.permissions = u32::from_str_radix(value, 8).ok().map(format_permissions);
            }
            _ => {}
        }
    }
    if entry.is_directory {
        entry.size = None;
    }
    Some(entry)
}

/// `YYYYMMDDHHMMSS[.sss]`, always UTC.
pub(crate) fn parse_mlsd_time(value: &str) -> Option<DateTime<Utc>> {
    let base = value.get(..14)?;
    let naive = NaiveDateTime::parse_from_str(base, "%Y%m%d%H%M%S").ok()?;
    Some(naive.and_utc())
}

/// Parse one `LIST` line in Unix (`ls -l`) or DOS format.
///
/// `now` resolves the year of recent Unix entries, which omit it.
pub(crate) fn parse_list_line(
    line: &str,
    parent: &RemotePath,
    now: DateTime<Utc>,
) -> Option<RemoteFile> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() || line.starts_with("total ") {
        return None;
    }
    parse_unix_line(line, parent, now).or_else(|| parse_dos_line(line, parent))
}

/// Whitespace-separated tokens with their byte offsets, so a file name can
/// be taken verbatim from the rest of the line.
fn tokens(line: &str) -> Vec<(usize, &str)> {
    let mut out = Vec::new();
    let mut start = None;
    for (i, c) in line.char_indices() {
        match (c.is_whitespace(), start) {
            (true, Some(s)) => {
                out.push((s, &line[s..i]));
                start = None;
            }
            (false, None) => start = Some(i),
            _ => {}
        }
    }
    if let Some(s) = start {
        out.push((s, &line[s..]));
    }
    out
}

fn month_number(token: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    let lower = token.to_ascii_lowercase();
    MONTHS.iter().position(|m| *m == lower).map(|i| i as u32 + 1)
}

fn skip_name(name: &str) -> bool {
    name.is_empty() || name == "." || name == ".."
}

fn parse_unix_line(line: &str, parent: &RemotePath, now: DateTime<Utc>) -> Option<RemoteFile> {
    let toks = tokens(line);
    let mode = toks.first()?.1;
    let kind = *mode.as_bytes().first()?;
    if mode.len() < 10 || !matches!(kind, b'-' | b'd' | b'l' | b'b' | b'c' | b'p' | b's') {
        return None;
    }

    // Date is "Mon DD HH:MM" or "Mon DD YYYY"; size is the token before it.
    // Owner and group columns vary in count, so locate the month instead.
    let month_idx = (2..toks.len().saturating_sub(3)).find(|&i| {
        month_number(toks[i].1).is_some()
            && toks[i - 1].1.parse::<u64>().is_ok()
            && toks[i + 1].1.parse::<u32>().is_ok()
    })?;
    let month = month_number(toks[month_idx].1)?;
    let day: u32 = toks[month_idx + 1].1.parse().ok()?;
    let size: u64 = toks[month_idx - 1].1.parse().ok()?;
    let time_or_year = toks[month_idx + 2].1;
    let name_start = toks[month_idx + 3].0;

    let modified_at = if let Some((h, m)) = time_or_year.split_once(':') {
        let time = NaiveTime::from_hms_opt(h.parse().ok()?, m.parse().ok()?, 0)?;
        let year = now.year();
        // Entries without a year are within the last six months. A date
        // ahead of now, or one missing from this year (Feb 29), belongs to
        // last year.
        [year, year - 1]
            .into_iter()
            .filter_map(|y| NaiveDate::from_ymd_opt(y, month, day))
            .map(|d| d.and_time(time).and_utc())
            .find(|dt| *dt <= now + chrono::Duration::days(1))
    } else {
        let year: i32 = time_or_year.parse().ok()?;
        NaiveDate::from_ymd_opt(year, month, day)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| Utc.from_utc_datetime(&dt))
    };

    let mut name = &line[name_start..];
    if kind == b'l' {
        if let Some((link, _target)) = name.split_once(" -> ") {
            name = link;
        }
    }
    if skip_name(name) {
        return None;
    }

    let is_directory = kind == b'd';
    Some(RemoteFile {
        name: name.to_string(),
        path: parent.child(name),
        is_directory,
        is_symlink: kind == b'l',
        size: (!is_directory).then_some(size),
        modified_at,
        permissions: mode.get(1..10).map(str::to_string),
    })
}

fn parse_dos_line(line: &str, parent: &RemotePath) -> Option<RemoteFile> {
    let toks = tokens(line);
    if toks.len() < 4 {
        return None;
    }
    let date = NaiveDate::parse_from_str(toks[0].1, "%m-%d-%y")
        .or_else(|_| NaiveDate::parse_from_str(toks[0].1, "%m-%d-%Y"))
        .ok()?;
    let time = NaiveTime::parse_from_str(toks[1].1, "%I:%M%p")
        .or_else(|_| NaiveTime::parse_from_str(toks[1].1, "%H:%M"))
        .ok()?;
    let is_directory = toks[2].1.eq_ignore_ascii_case("<DIR>");
    let size = if is_directory {
        None
    } else {
        Some(toks[2].1.parse::<u64>().ok()?)
    };
    let name = &line[toks[3].0..];
    if skip_name(name) {
        return None;
    }

    Some(RemoteFile {
        name: name.to_string(),
        path: parent.child(name),
        is_directory,
        is_symlink: false,
        size,
        modified_at: Some(date.and_time(time).and_utc()),
        permissions: None,
    })
}
