use crate::models::{Project, Transfer, TransferFile};
use anyhow::Result;
use chrono::{DateTime, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::writer::Writer;
use std::io::Cursor;

pub const ATOM_NS: &str = "http://www.w3.org/2005/Atom";
pub const APP_NS: &str = "http://www.w3.org/2007/app";
pub const SWORD_NS: &str = "http://purl.org/net/sword/";

pub const SERVICE_MEDIA_TYPE: &str = "application/atomsvc+xml";
pub const ATOM_MEDIA_TYPE: &str = "application/atom+xml";

pub fn collection_href(project_id: &str) -> String {
    format!("/api/collection/{project_id}")
}

pub fn entry_href(project_id: &str, transfer_id: &str) -> String {
    format!("/api/collection/{project_id}/{transfer_id}")
}

pub fn package_href(project_id: &str, transfer_id: &str) -> String {
    format!("/api/collection/{project_id}/{transfer_id}/package")
}

fn rfc3339(t: Option<DateTime<Utc>>) -> String {
    t.unwrap_or_else(Utc::now).to_rfc3339()
}

fn text_element<W: std::io::Write>(w: &mut Writer<W>, name: &str, text: &str) -> Result<()> {
    w.write_event(Event::Start(BytesStart::new(name)))?;
    w.write_event(Event::Text(BytesText::new(text)))?;
    w.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

/// Atom service document: one app:collection per project the user may
/// deposit into.
pub fn service_document(projects: &[Project]) -> Result<String> {
    use crate::utils::validation::{ACCEPTED_MEDIA_TYPE, BAGIT_PACKAGING_URI};

    let mut w = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
    w.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;

    let mut service = BytesStart::new("service");
    service.push_attribute(("xmlns", APP_NS));
    service.push_attribute(("xmlns:atom", ATOM_NS));
    service.push_attribute(("xmlns:sword", SWORD_NS));
    w.write_event(Event::Start(service))?;

    text_element(&mut w, "sword:version", "1.3")?;

    w.write_event(Event::Start(BytesStart::new("workspace")))?;
    text_element(&mut w, "atom:title", "Deposit workspace")?;

    for project in projects {
        let mut collection = BytesStart::new("collection");
        collection.push_attribute(("href", collection_href(&project.id).as_str()));
        w.write_event(Event::Start(collection))?;
        text_element(&mut w, "atom:title", &project.name)?;
        text_element(&mut w, "accept", ACCEPTED_MEDIA_TYPE)?;
        text_element(&mut w, "sword:acceptPackaging", BAGIT_PACKAGING_URI)?;
        w.write_event(Event::End(BytesEnd::new("collection")))?;
    }

    w.write_event(Event::End(BytesEnd::new("workspace")))?;
    w.write_event(Event::End(BytesEnd::new("service")))?;

    Ok(String::from_utf8(w.into_inner().into_inner())?)
}

/// Atom feed listing a project's transfers.
pub fn collection_feed(
    project: &Project,
    transfers: &[(Transfer, Vec<TransferFile>)],
) -> Result<String> {
    let mut w = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
    w.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;

    let mut feed = BytesStart::new("feed");
    feed.push_attribute(("xmlns", ATOM_NS));
    feed.push_attribute(("xmlns:sword", SWORD_NS));
    w.write_event(Event::Start(feed))?;

    text_element(&mut w, "id", &collection_href(&project.id))?;
    text_element(&mut w, "title", &project.name)?;
    let updated = transfers
        .iter()
        .map(|(t, _)| t.completed_at.or(t.created_at))
        .max()
        .flatten();
    text_element(&mut w, "updated", &rfc3339(updated))?;

    for (transfer, files) in transfers {
        write_entry(&mut w, project, transfer, files, false)?;
    }

    w.write_event(Event::End(BytesEnd::new("feed")))?;
    Ok(String::from_utf8(w.into_inner().into_inner())?)
}

/// Standalone Atom entry describing one transfer.
pub fn transfer_entry(
    project: &Project,
    transfer: &Transfer,
    files: &[TransferFile],
) -> Result<String> {
    let mut w = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
    w.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;
    write_entry(&mut w, project, transfer, files, true)?;
    Ok(String::from_utf8(w.into_inner().into_inner())?)
}

fn write_entry<W: std::io::Write>(
    w: &mut Writer<W>,
    project: &Project,
    transfer: &Transfer,
    files: &[TransferFile],
    standalone: bool,
) -> Result<()> {
    let mut entry = BytesStart::new("entry");
    if standalone {
        entry.push_attribute(("xmlns", ATOM_NS));
        entry.push_attribute(("xmlns:sword", SWORD_NS));
    }
    w.write_event(Event::Start(entry))?;

    text_element(w, "id", &format!("urn:uuid:{}", transfer.id))?;
    let title = files
        .first()
        .map(|f| f.filename.as_str())
        .unwrap_or(transfer.id.as_str());
    text_element(w, "title", title)?;
    text_element(w, "published", &rfc3339(transfer.created_at))?;
    text_element(
        w,
        "updated",
        &rfc3339(transfer.completed_at.or(transfer.created_at)),
    )?;
    text_element(w, "sword:packaging", &transfer.packaging)?;

    let mut edit = BytesStart::new("link");
    edit.push_attribute(("rel", "edit"));
    edit.push_attribute(("href", entry_href(&project.id, &transfer.id).as_str()));
    w.write_event(Event::Empty(edit))?;

    // One content element per spec; multi-file transfers are unsupported
    // and surface as 501 on retrieval.
    if let Some(file) = files.first() {
        let mut content = BytesStart::new("content");
        content.push_attribute(("type", file.mimetype.as_str()));
        content.push_attribute(("src", package_href(&project.id, &transfer.id).as_str()));
        w.write_event(Event::Empty(content))?;
        text_element(w, "sword:verboseDescription", &format!("md5:{}", file.md5))?;
    }

    w.write_event(Event::End(BytesEnd::new("entry")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project() -> Project {
        Project {
            id: "p1".into(),
            name: "NDIIPP".into(),
            max_upload_size: None,
            created_at: Some(Utc::now()),
        }
    }

    fn transfer() -> Transfer {
        Transfer {
            id: "t1".into(),
            project_id: "p1".into(),
            user_id: "u1".into(),
            packaging: crate::utils::validation::BAGIT_PACKAGING_URI.into(),
            created_at: Some(Utc::now()),
            completed_at: Some(Utc::now()),
        }
    }

    fn file() -> TransferFile {
        TransferFile {
            id: "f1".into(),
            transfer_id: "t1".into(),
            filename: "foobar.zip".into(),
            mimetype: "application/zip".into(),
            md5: "3858f62230ac3c915f300c664312c63f".into(),
            created_at: Some(Utc::now()),
        }
    }

    #[test]
    fn test_service_document() {
        let xml = service_document(&[project()]).unwrap();
        assert!(xml.contains("href=\"/api/collection/p1\""));
        assert!(xml.contains("<atom:title>NDIIPP</atom:title>"));
        assert!(xml.contains("<accept>application/zip</accept>"));
        assert!(xml.contains("sword-types/bagit"));
    }

    #[test]
    fn test_collection_feed() {
        let xml = collection_feed(&project(), &[(transfer(), vec![file()])]).unwrap();
        assert!(xml.contains("<feed"));
        assert!(xml.contains("<title>NDIIPP</title>"));
        assert!(xml.contains("urn:uuid:t1"));
        assert!(xml.contains("src=\"/api/collection/p1/t1/package\""));
    }

    #[test]
    fn test_transfer_entry_without_file() {
        let xml = transfer_entry(&project(), &transfer(), &[]).unwrap();
        assert!(xml.contains("<entry"));
        assert!(xml.contains("urn:uuid:t1"));
        assert!(!xml.contains("<content"));
    }

    #[test]
    fn test_entry_escapes_text() {
        let mut p = project();
        p.name = "R&D <archive>".into();
        let xml = service_document(&[p]).unwrap();
        assert!(xml.contains("R&amp;D &lt;archive&gt;"));
    }
}
