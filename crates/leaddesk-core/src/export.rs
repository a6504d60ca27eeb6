//! CSV export of a lead working set.

use chrono::{NaiveDate, SecondsFormat};
use leaddesk_store::Lead;

/// Column headers, in output order.
pub const CSV_HEADER: [&str; 10] = [
    "ID", "Date", "Name", "Email", "Telegram", "Seats", "Company", "Goal", "Status", "Notes",
];

const DELIMITER: &str = ";";
const BOM: char = '\u{feff}';

/// A rendered export, ready to be written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvExport {
    /// `leads_YYYY-MM-DD.csv`
    pub filename: String,
    /// UTF-8 with a leading byte-order mark.
    pub bytes: Vec<u8>,
}

fn quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

fn row(fields: &[&str]) -> String {
    fields
        .iter()
        .map(|f| quote(f))
        .collect::<Vec<_>>()
        .join(DELIMITER)
}

/// Render `leads` as semicolon-delimited CSV, header first, BOM prefixed.
pub fn leads_to_csv<'a>(leads: impl IntoIterator<Item = &'a Lead>) -> String {
    let mut lines = vec![CSV_HEADER.join(DELIMITER)];
    for lead in leads {
        let id = lead.id.to_string();
        let date = lead.created_at.to_rfc3339_opts(SecondsFormat::Millis, true);
        let seats = lead.seats.to_string();
        lines.push(row(&[
            id.as_str(),
            date.as_str(),
            lead.name.as_str(),
            lead.email.as_str(),
            lead.telegram.as_deref().unwrap_or_default(),
            seats.as_str(),
            lead.company.as_deref().unwrap_or_default(),
            lead.goal.as_deref().unwrap_or_default(),
            lead.status.label(),
            lead.notes.as_deref().unwrap_or_default(),
        ]));
    }

    let mut out = String::from(BOM);
    out.push_str(&lines.join("\n"));
    out
}

/// Export `leads` with a filename stamped with `date`.
pub fn export_leads<'a>(leads: impl IntoIterator<Item = &'a Lead>, date: NaiveDate) -> CsvExport {
    CsvExport {
        filename: format!("leads_{}.csv", date.format("%Y-%m-%d")),
        bytes: leads_to_csv(leads).into_bytes(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{TimeZone, Utc};
    use leaddesk_store::{LeadId, LeadStatus};

    use super::*;

    fn lead() -> Lead {
        Lead {
            id: LeadId::nil(),
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap(),
            name: "Ann \"The\" Admin".to_owned(),
            email: "a@x.com".to_owned(),
            telegram: None,
            seats: 5,
            company: Some("ACME; Corp".to_owned()),
            goal: None,
            status: LeadStatus::InProgress,
            notes: Some("call back".to_owned()),
            source: Some("base".to_owned()),
        }
    }

    #[test]
    fn header_and_row_are_quoted() {
        let csv = leads_to_csv([&lead()]);
        assert!(csv.starts_with('\u{feff}'));

        let lines: Vec<&str> = csv.trim_start_matches('\u{feff}').split('\n').collect();
        assert_eq!(
            lines[0],
            "ID;Date;Name;Email;Telegram;Seats;Company;Goal;Status;Notes"
        );
        assert_eq!(
            lines[1],
            "\"00000000-0000-0000-0000-000000000000\";\"2024-05-01T09:30:00.000Z\";\
             \"Ann \"\"The\"\" Admin\";\"a@x.com\";\"\";\"5\";\"ACME; Corp\";\"\";\
             \"In progress\";\"call back\""
        );
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn empty_working_set_is_header_only() {
        let csv = leads_to_csv(std::iter::empty());
        assert_eq!(csv.matches('\n').count(), 0);
        assert!(csv.ends_with("Notes"));
    }

    #[test]
    fn filename_carries_date() {
        let export = export_leads([&lead()], NaiveDate::from_ymd_opt(2024, 5, 2).unwrap());
        assert_eq!(export.filename, "leads_2024-05-02.csv");
        assert_eq!(&export.bytes[..3], &[0xEF, 0xBB, 0xBF]);
    }
}
