use std::fs::File;
use std::path::Path;

use csv::Writer;

use crate::report::IndexEntry;

pub fn write_csv(path: &Path, items: &[&IndexEntry]) -> anyhow::Result<()> {
    let f = File::create(path)?;
    let mut w = Writer::from_writer(f);
    w.write_record(["category", "endpoint", "method", "confidence", "file", "curl"])?;
    for it in items {
        w.write_record(&[
            it.category.clone(),
            it.endpoint.clone(),
            it.method.clone().unwrap_or_default(),
            it.confidence.map(|c| format!("{:.2}", c)).unwrap_or_default(),
            it.filename.clone(),
            it.curl.clone(),
        ])?;
    }
    w.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_has_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("findings.csv");
        let e = IndexEntry {
            name: "x".into(),
            filename: "x.md".into(),
            category: "Reflected XSS (indicator)".into(),
            endpoint: "https://a.test/?q=1".into(),
            method: Some("GET".into()),
            confidence: Some(0.9),
            curl: "curl -i -X GET 'https://a.test/?q=1'".into(),
            evidence: String::new(),
        };
        write_csv(&path, &[&e]).unwrap();

        let mut rdr = csv::Reader::from_path(&path).unwrap();
        let rows: Vec<csv::StringRecord> = rdr.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(&rows[0][0], "Reflected XSS (indicator)");
        assert_eq!(&rows[0][3], "0.90");
    }
}
