//! CSV export.
//!
//! RFC 4180 quoting: fields containing commas, quotes or newlines are
//! wrapped and embedded quotes doubled. Output uses `\r\n` row separators.

use funil_contacts::{format_cnpj, Organization, Person};

/// Render rows into CSV with a header line.
pub fn to_csv(header: &[&str], rows: &[Vec<String>]) -> String {
    let mut out = String::new();
    push_row(&mut out, header.iter().map(|s| (*s).to_string()));
    for row in rows {
        push_row(&mut out, row.iter().cloned());
    }
    out
}

fn push_row(out: &mut String, fields: impl Iterator<Item = String>) {
    let mut first = true;
    for field in fields {
        if !first {
            out.push(',');
        }
        first = false;
        out.push_str(&escape(&field));
    }
    out.push_str("\r\n");
}

fn escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

pub const ORGANIZATION_HEADER: [&str; 7] =
    ["name", "legal_name", "cnpj", "email", "phone", "website", "city"];

pub fn organizations_to_csv(orgs: &[Organization]) -> String {
    let rows: Vec<Vec<String>> = orgs
        .iter()
        .map(|o| {
            vec![
                o.name.clone(),
                o.legal_name.clone().unwrap_or_default(),
                format_cnpj(o.cnpj.as_deref()),
                o.email.clone().unwrap_or_default(),
                o.phone.clone().unwrap_or_default(),
                o.website.clone().unwrap_or_default(),
                o.address.city.clone().unwrap_or_default(),
            ]
        })
        .collect();
    to_csv(&ORGANIZATION_HEADER, &rows)
}

pub const PERSON_HEADER: [&str; 5] = ["name", "email", "phone", "whatsapp", "job_title"];

pub fn people_to_csv(people: &[Person]) -> String {
    let rows: Vec<Vec<String>> = people
        .iter()
        .map(|p| {
            vec![
                p.name.clone(),
                p.email.clone().unwrap_or_default(),
                p.phone.clone().unwrap_or_default(),
                p.whatsapp.clone().unwrap_or_default(),
                p.job_title.clone().unwrap_or_default(),
            ]
        })
        .collect();
    to_csv(&PERSON_HEADER, &rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use funil_contacts::OrganizationId;
    use funil_core::{RecordId, TenantId, UserId};

    #[test]
    fn quotes_fields_with_commas_and_doubles_embedded_quotes() {
        let csv = to_csv(
            &["a", "b"],
            &[vec!["x,y".to_string(), "say \"hi\"".to_string()]],
        );
        assert_eq!(csv, "a,b\r\n\"x,y\",\"say \"\"hi\"\"\"\r\n");
    }

    #[test]
    fn plain_fields_stay_unquoted() {
        let csv = to_csv(&["a"], &[vec!["plain".to_string()]]);
        assert_eq!(csv, "a\r\nplain\r\n");
    }

    #[test]
    fn organization_export_formats_the_cnpj() {
        let now = Utc::now();
        let mut org = Organization::new(
            OrganizationId::new(RecordId::new()),
            TenantId::new(),
            "Acme",
            UserId::new(),
            now,
        )
        .unwrap();
        org.cnpj = Some("11222333000181".to_string());

        let csv = organizations_to_csv(&[org]);
        assert!(csv.contains("11.222.333/0001-81"));
        assert!(csv.starts_with("name,legal_name,cnpj"));
    }
}
