use crate::model::FileRecord;

const COLUMNS: [&str; 7] = ["path", "name", "mime", "class", "size", "modified", "owner"];

pub fn to_csv(records: &[FileRecord], mut w: impl std::io::Write) -> csv::Result<()> {
    let mut writer = csv::Writer::from_writer(&mut w);
    writer.write_record(COLUMNS)?;
    for r in records {
        let size = r.size_bytes.to_string();
        let modified = r.modified_at.to_rfc3339();
        writer.write_record([
            r.path.as_str(),
            r.name.as_str(),
            r.mime.as_str(),
            r.mime_class.as_str(),
            size.as_str(),
            modified.as_str(),
            r.owner_category_id.as_str(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

pub fn to_json(records: &[FileRecord]) -> serde_json::Value {
    serde_json::json!({
        "count": records.len(),
        "files": records.iter().map(|r| serde_json::json!({
            "path": r.path,
            "name": r.name,
            "mime": r.mime,
            "class": r.mime_class.as_str(),
            "size": r.size_bytes,
            "modified": r.modified_at.to_rfc3339(),
            "owner": r.owner_category_id,
            "uri": r.resource_uri,
        })).collect::<Vec<_>>()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MimeClass;
    use chrono::{TimeZone, Utc};

    fn sample() -> Vec<FileRecord> {
        vec![FileRecord {
            path: "/storage/emulated/0/DCIM/a, b.jpg".into(),
            resource_uri: "scoped://DCIM%2Fa%2C%20b.jpg".into(),
            name: "a, b.jpg".into(),
            mime: "image/jpeg".into(),
            mime_class: MimeClass::Image,
            size_bytes: 2048,
            modified_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            owner_category_id: "cam".into(),
        }]
    }

    #[test]
    fn csv_has_header_and_quotes_commas() {
        let mut out = Vec::new();
        to_csv(&sample(), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("path,name,mime,class,size,modified,owner"));
        assert_eq!(
            lines.next(),
            Some("\"/storage/emulated/0/DCIM/a, b.jpg\",\"a, b.jpg\",image/jpeg,image,2048,2024-05-01T12:00:00+00:00,cam")
        );
    }

    #[test]
    fn json_lists_every_record() {
        let v = to_json(&sample());
        assert_eq!(v["count"], 1);
        assert_eq!(v["files"][0]["class"], "image");
        assert_eq!(v["files"][0]["size"], 2048);
    }
}
