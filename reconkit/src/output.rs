use anyhow::Result;
use clap::ValueEnum;
use enrich_store::EnrichRecord;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat { Text, Json, Jsonl }

pub fn print_json<T: Serialize>(v: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(v)?);
    Ok(())
}

const RECORD_HEADER: [&str; 10] = ["url", "alive", "code", "size", "title", "content_type", "final_url", "latency_ms", "last_probe", "error"];

/// Write per-URL results as CSV or JSONL, to `path` or stdout.
pub fn write_records(path: Option<&Path>, csv: bool, rows: &[(String, EnrichRecord)]) -> Result<()> {
    let sink: Box<dyn Write> = match path {
        Some(p) => Box::new(BufWriter::new(File::create(p)?)),
        None => Box::new(std::io::stdout().lock()),
    };
    if csv {
        let mut wtr = csv::Writer::from_writer(sink);
        wtr.write_record(RECORD_HEADER)?;
        for (url, r) in rows {
            wtr.write_record([
                url.clone(),
                r.alive.to_string(),
                r.code.map(|v| v.to_string()).unwrap_or_default(),
                r.size.map(|v| v.to_string()).unwrap_or_default(),
                r.title.clone().unwrap_or_default(),
                r.content_type.clone().unwrap_or_default(),
                r.final_url.clone(),
                r.latency_ms.map(|v| v.to_string()).unwrap_or_default(),
                r.last_probe.clone().unwrap_or_default(),
                r.error.clone().unwrap_or_default(),
            ])?;
        }
        wtr.flush()?;
    } else {
        let mut w = sink;
        for (url, r) in rows {
            let obj = serde_json::json!({ "url": url, "record": r });
            writeln!(w, "{}", serde_json::to_string(&obj)?)?;
        }
        w.flush()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_and_jsonl_files() {
        let dir = tempfile::tempdir().unwrap();
        let rows = vec![
            ("https://example.com/".to_string(), EnrichRecord { alive: true, code: Some(200), title: Some("Home, sweet".into()), ..Default::default() }),
            ("https://example.com/x".to_string(), EnrichRecord::failure("https://example.com/x", "timed out")),
        ];
        let p = dir.path().join("out.csv");
        write_records(Some(&p), true, &rows).unwrap();
        let text = std::fs::read_to_string(&p).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("url,alive,code,size,title,content_type,final_url,latency_ms,last_probe,error"));
        assert!(lines.next().unwrap().contains("\"Home, sweet\""));
        assert!(lines.next().unwrap().ends_with("timed out"));

        let p = dir.path().join("out.jsonl");
        write_records(Some(&p), false, &rows).unwrap();
        let text = std::fs::read_to_string(&p).unwrap();
        let first: serde_json::Value = serde_json::from_str(text.lines().next().unwrap()).unwrap();
        assert_eq!(first["record"]["code"], 200);
    }
}
