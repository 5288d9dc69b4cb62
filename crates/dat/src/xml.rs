//! XML round-trip for the dat format.
//!
//! The document shape is `datafile/(header | game[@name]/rom[@name,@size,
//! @crc,@sha1])`. Parsing is lenient about elements it does not recognise
//! (they are recorded, not rejected) because only [`merge`](crate::Datafile::merge)
//! treats an unknown top-level element as an error. Hex digests are accepted
//! in either case and normalised to lowercase; canonical output is lowercase.

use crate::error::{ErrorKind, Result};
use crate::model::{Game, Header, Rom};
use exn::ResultExt;
use quick_xml::Reader;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::name::QName;

/// A parsed dat document, before it is split into catalogue and remaining
/// views.
#[derive(Debug)]
pub(crate) struct Document {
    pub header: Header,
    pub games: Vec<Game>,
    /// Tag names of top-level elements that were neither `header` nor
    /// `game`, in document order.
    pub unknown: Vec<String>,
}

#[track_caller]
fn parse_error(message: impl Into<String>) -> crate::error::Error {
    ErrorKind::Parse(message.into()).into()
}

pub(crate) fn parse(bytes: &[u8]) -> Result<Document> {
    let mut reader = Reader::from_reader(bytes);
    let mut buf = Vec::new();
    let mut skip_buf = Vec::new();

    let mut doc = Document { header: Header::default(), games: Vec::new(), unknown: Vec::new() };
    let mut saw_root = false;

    loop {
        let event =
            reader.read_event_into(&mut buf).or_raise(|| ErrorKind::Parse("invalid XML".into()))?;
        match event {
            Event::Start(e) if !saw_root => {
                if e.name().as_ref() != b"datafile" {
                    return Err(parse_error(format!(
                        "expected datafile root, found {}",
                        String::from_utf8_lossy(e.name().as_ref())
                    )));
                }
                saw_root = true;
            },
            Event::Start(e) if e.name().as_ref() == b"header" => {
                doc.header = read_header(&mut reader)?;
            },
            Event::Start(e) if e.name().as_ref() == b"game" => {
                let name = required_attr(&e, "name")?;
                let roms = read_game(&mut reader, &name)?;
                doc.games.push(Game { name, roms });
            },
            Event::Empty(e) if e.name().as_ref() == b"game" => {
                let name = required_attr(&e, "name")?;
                doc.games.push(Game { name, roms: Vec::new() });
            },
            Event::Empty(e) if e.name().as_ref() == b"header" => {},
            Event::Start(e) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                let end = e.to_end().into_owned();
                reader
                    .read_to_end_into(end.name(), &mut skip_buf)
                    .or_raise(|| ErrorKind::Parse(format!("unterminated element {tag}")))?;
                doc.unknown.push(tag);
            },
            Event::Empty(e) => {
                doc.unknown.push(String::from_utf8_lossy(e.name().as_ref()).into_owned());
            },
            Event::End(_) => {},
            Event::Eof => break,
            // Declarations, comments, doctype and inter-element whitespace
            _ => {},
        }
        buf.clear();
    }

    if !saw_root {
        return Err(parse_error("no datafile root element"));
    }
    Ok(doc)
}

/// Read `header` children as `(tag, text)` pairs until the closing tag.
fn read_header(reader: &mut Reader<&[u8]>) -> Result<Header> {
    let mut buf = Vec::new();
    let mut header = Header::default();
    loop {
        let event =
            reader.read_event_into(&mut buf).or_raise(|| ErrorKind::Parse("invalid XML".into()))?;
        match event {
            Event::Start(e) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                let end = e.to_end().into_owned();
                let text = read_text(reader, end.name())?;
                header.fields.push((tag, text));
            },
            Event::Empty(e) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                header.fields.push((tag, String::new()));
            },
            Event::End(e) if e.name().as_ref() == b"header" => return Ok(header),
            Event::Eof => return Err(parse_error("unterminated header element")),
            _ => {},
        }
        buf.clear();
    }
}

/// Collect the text content of an element up to its closing tag.
fn read_text(reader: &mut Reader<&[u8]>, end: QName<'_>) -> Result<String> {
    let mut buf = Vec::new();
    let mut text = String::new();
    loop {
        let event =
            reader.read_event_into(&mut buf).or_raise(|| ErrorKind::Parse("invalid XML".into()))?;
        match event {
            Event::Text(t) => {
                let chunk = t.unescape().or_raise(|| ErrorKind::Parse("invalid text".into()))?;
                text.push_str(&chunk);
            },
            Event::End(e) if e.name() == end => return Ok(text.trim().to_string()),
            Event::Eof => return Err(parse_error("unterminated element")),
            _ => {},
        }
        buf.clear();
    }
}

/// Read `rom` children of a `game` element until the closing tag.
fn read_game(reader: &mut Reader<&[u8]>, game: &str) -> Result<Vec<Rom>> {
    let mut buf = Vec::new();
    let mut skip_buf = Vec::new();
    let mut roms = Vec::new();
    loop {
        let event =
            reader.read_event_into(&mut buf).or_raise(|| ErrorKind::Parse("invalid XML".into()))?;
        match event {
            Event::Empty(e) if e.name().as_ref() == b"rom" => {
                roms.push(read_rom(&e, game)?);
            },
            Event::Start(e) if e.name().as_ref() == b"rom" => {
                let rom = read_rom(&e, game)?;
                let end = e.to_end().into_owned();
                reader
                    .read_to_end_into(end.name(), &mut skip_buf)
                    .or_raise(|| ErrorKind::Parse("unterminated rom element".into()))?;
                roms.push(rom);
            },
            // Games can carry other metadata (description, release, ...);
            // only rom entries matter for reconciliation.
            Event::Start(e) => {
                let end = e.to_end().into_owned();
                reader
                    .read_to_end_into(end.name(), &mut skip_buf)
                    .or_raise(|| ErrorKind::Parse("unterminated element".into()))?;
            },
            Event::End(e) if e.name().as_ref() == b"game" => return Ok(roms),
            Event::Eof => return Err(parse_error(format!("unterminated game element {game}"))),
            _ => {},
        }
        buf.clear();
    }
}

fn read_rom(e: &BytesStart<'_>, game: &str) -> Result<Rom> {
    let name = required_attr(e, "name")?;
    let size = required_attr(e, "size")?;
    let size = size
        .parse::<u64>()
        .or_raise(|| ErrorKind::Parse(format!("bad size for rom {game}/{name}")))?;
    let crc = required_attr(e, "crc")?.to_ascii_lowercase();
    let sha1 = required_attr(e, "sha1")?.to_ascii_lowercase();
    Ok(Rom { game: game.to_string(), name, size, crc, sha1 })
}

fn required_attr(e: &BytesStart<'_>, key: &str) -> Result<String> {
    for attr in e.attributes() {
        let attr = attr.or_raise(|| ErrorKind::Parse("malformed attribute".into()))?;
        if attr.key.as_ref() == key.as_bytes() {
            let value =
                attr.unescape_value().or_raise(|| ErrorKind::Parse("malformed attribute".into()))?;
            return Ok(value.into_owned());
        }
    }
    Err(parse_error(format!(
        "missing {key} attribute on {}",
        String::from_utf8_lossy(e.name().as_ref())
    )))
}

/// Serialise a header and game list back to dat XML. Hex digests are
/// emitted lowercase; attribute values are escaped by the writer.
pub(crate) fn marshal(header: &Header, games: &[Game]) -> Result<Vec<u8>> {
    let mut writer = quick_xml::Writer::new_with_indent(Vec::new(), b'\t', 1);

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .or_raise(|| ErrorKind::Marshal)?;
    writer.write_event(Event::Start(BytesStart::new("datafile"))).or_raise(|| ErrorKind::Marshal)?;

    if !header.is_empty() {
        writer
            .write_event(Event::Start(BytesStart::new("header")))
            .or_raise(|| ErrorKind::Marshal)?;
        for (tag, text) in &header.fields {
            writer
                .write_event(Event::Start(BytesStart::new(tag.as_str())))
                .or_raise(|| ErrorKind::Marshal)?;
            writer
                .write_event(Event::Text(BytesText::new(text)))
                .or_raise(|| ErrorKind::Marshal)?;
            writer
                .write_event(Event::End(BytesEnd::new(tag.as_str())))
                .or_raise(|| ErrorKind::Marshal)?;
        }
        writer.write_event(Event::End(BytesEnd::new("header"))).or_raise(|| ErrorKind::Marshal)?;
    }

    for game in games {
        let mut start = BytesStart::new("game");
        start.push_attribute(("name", game.name.as_str()));
        writer.write_event(Event::Start(start)).or_raise(|| ErrorKind::Marshal)?;
        for rom in &game.roms {
            let mut el = BytesStart::new("rom");
            el.push_attribute(("name", rom.name.as_str()));
            el.push_attribute(("size", rom.size.to_string().as_str()));
            el.push_attribute(("crc", rom.crc.as_str()));
            el.push_attribute(("sha1", rom.sha1.as_str()));
            writer.write_event(Event::Empty(el)).or_raise(|| ErrorKind::Marshal)?;
        }
        writer.write_event(Event::End(BytesEnd::new("game"))).or_raise(|| ErrorKind::Marshal)?;
    }

    writer.write_event(Event::End(BytesEnd::new("datafile"))).or_raise(|| ErrorKind::Marshal)?;
    let mut bytes = writer.into_inner();
    bytes.push(b'\n');
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
<datafile>
	<header>
		<name>Example Set</name>
		<version>1.0</version>
	</header>
	<game name="Foo (USA)">
		<rom name="foo.smc" size="4" crc="DEADBEEF" sha1="B858CB282617FB0956D960215C8E84D1CCF909C6"/>
	</game>
	<game name="Bar &amp; Baz (Europe)">
		<rom name="bar.bin" size="10" crc="0000abcd" sha1="0000000000000000000000000000000000000001"/>
		<rom name="bar.cue" size="20" crc="0000abce" sha1="0000000000000000000000000000000000000002"/>
	</game>
</datafile>
"#;

    #[test]
    fn test_parse_sample() {
        let doc = parse(SAMPLE.as_bytes()).unwrap();
        assert_eq!(doc.header.get("name"), Some("Example Set"));
        assert_eq!(doc.games.len(), 2);
        assert_eq!(doc.games[0].name, "Foo (USA)");
        assert_eq!(doc.games[1].name, "Bar & Baz (Europe)");
        assert_eq!(doc.games[1].roms.len(), 2);
        assert!(doc.unknown.is_empty());
    }

    #[test]
    fn test_parse_lowercases_hex() {
        let doc = parse(SAMPLE.as_bytes()).unwrap();
        let rom = &doc.games[0].roms[0];
        assert_eq!(rom.crc, "deadbeef");
        assert_eq!(rom.sha1, "b858cb282617fb0956d960215c8e84d1ccf909c6");
    }

    #[test]
    fn test_parse_records_unknown_elements() {
        let input = r#"<datafile><machine name="x"/><game name="G"/></datafile>"#;
        let doc = parse(input.as_bytes()).unwrap();
        assert_eq!(doc.unknown, vec!["machine".to_string()]);
        assert_eq!(doc.games.len(), 1);
    }

    #[test]
    fn test_parse_rejects_missing_attributes() {
        let input = r#"<datafile><game name="G"><rom name="a.bin" size="1" crc="00000000"/></game></datafile>"#;
        let err = parse(input.as_bytes()).unwrap_err();
        assert!(matches!(err.current_value(), ErrorKind::Parse(_)));
    }

    #[test]
    fn test_parse_rejects_bad_size() {
        let input = r#"<datafile><game name="G"><rom name="a.bin" size="big" crc="00000000" sha1="0000000000000000000000000000000000000000"/></game></datafile>"#;
        assert!(parse(input.as_bytes()).is_err());
    }

    #[test]
    fn test_parse_rejects_wrong_root() {
        let err = parse(b"<mame><game name=\"G\"/></mame>").unwrap_err();
        assert!(matches!(err.current_value(), ErrorKind::Parse(_)));
    }

    #[test]
    fn test_roundtrip_preserves_entries() {
        let doc = parse(SAMPLE.as_bytes()).unwrap();
        let bytes = marshal(&doc.header, &doc.games).unwrap();
        let again = parse(&bytes).unwrap();
        assert_eq!(again.header, doc.header);
        assert_eq!(again.games, doc.games);
    }

    #[test]
    fn test_marshal_escapes_attributes() {
        let doc = parse(SAMPLE.as_bytes()).unwrap();
        let bytes = marshal(&doc.header, &doc.games).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("Bar &amp; Baz"));
    }
}
