use crate::model::*;

fn kind(n: &DocumentNode) -> &'static str {
    if n.is_directory() {
        "dir"
    } else if n.is_file() {
        "file"
    } else {
        "unknown"
    }
}

pub fn to_csv(root: &DocumentNode, mut w: impl std::io::Write) -> csv::Result<()> {
    let mut writer = csv::Writer::from_writer(&mut w);
    writer.write_record(["uri", "id", "name", "kind", "mime", "size", "modified", "flags"])?;
    for n in root.walk() {
        let modified: String = n.modified().map(|t| t.to_rfc3339()).unwrap_or_default();
        writer.write_record([
            n.uri(),
            n.id().to_string(),
            n.display_name().unwrap_or_default().to_string(),
            kind(n).to_string(),
            n.mime_type().unwrap_or_default().to_string(),
            n.size().to_string(),
            modified,
            n.flags().bits().to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

pub fn to_json(node: &DocumentNode) -> serde_json::Value {
    serde_json::json!({
        "uri": node.uri(),
        "id": node.id(),
        "name": node.display_name(),
        "kind": kind(node),
        "mime": node.mime_type(),
        "size": node.size(),
        "last_modified": node.last_modified(),
        "flags": node.flags().bits(),
        "expanded": node.expanded(),
        "children": node.children().iter().map(to_json).collect::<Vec<_>>()
    })
}
