//! Turns a summons directory SOAP response into [`SummonsRecord`]s.
//!
//! The document is read into a small element tree keyed by local name, so the
//! namespace prefixes the directory happens to use (`s:`, `soap:`, none) do not
//! matter. Navigation is `Envelope → Body → Response → Summonses → Summons*`.

use crate::error::NormalizeError;
use crate::types::{SummonsRecord, SummonsStatus, UNKNOWN};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

#[derive(Debug, Default)]
struct Element {
    name: String,
    text: String,
    children: Vec<Element>,
}

impl Element {
    fn from_start(start: &BytesStart) -> Self {
        Element {
            name: String::from_utf8_lossy(start.local_name().as_ref()).into_owned(),
            ..Default::default()
        }
    }

    fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Trimmed text of the named child, or `None` when missing or blank.
    fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name)
            .map(|c| c.text.trim())
            .filter(|t| !t.is_empty())
    }
}

fn parse_tree(raw_xml: &str) -> Result<Element, NormalizeError> {
    let mut reader = Reader::from_str(raw_xml);
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => stack.push(Element::from_start(&e)),
            Ok(Event::Empty(e)) => attach(&mut stack, &mut root, Element::from_start(&e))?,
            Ok(Event::End(_)) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| NormalizeError::Xml("unbalanced end tag".to_string()))?;
                attach(&mut stack, &mut root, element)?;
            }
            Ok(Event::Text(t)) => {
                if let Some(open) = stack.last_mut() {
                    let text = t
                        .unescape()
                        .map_err(|e| NormalizeError::Xml(e.to_string()))?;
                    open.text.push_str(&text);
                }
            }
            Ok(Event::CData(c)) => {
                if let Some(open) = stack.last_mut() {
                    open.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(NormalizeError::Xml(e.to_string())),
        }
    }

    if let Some(open) = stack.last() {
        return Err(NormalizeError::Xml(format!("unclosed <{}> element", open.name)));
    }
    root.ok_or_else(|| NormalizeError::Xml("document has no root element".to_string()))
}

fn attach(
    stack: &mut Vec<Element>,
    root: &mut Option<Element>,
    element: Element,
) -> Result<(), NormalizeError> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_none() => *root = Some(element),
        None => return Err(NormalizeError::Xml("multiple root elements".to_string())),
    }
    Ok(())
}

fn text_or_unknown(summons: &Element, name: &str) -> String {
    summons.child_text(name).unwrap_or(UNKNOWN).to_string()
}

/// Absent or unparseable amounts become 0.
fn parse_amount(raw: Option<&str>) -> f64 {
    raw.and_then(|s| s.parse::<f64>().ok())
        .filter(|a| a.is_finite())
        .unwrap_or(0.0)
}

fn record_from(summons: &Element) -> SummonsRecord {
    SummonsRecord {
        plate: summons
            .child_text("VehicleRegistrationNo")
            .map(str::to_uppercase)
            .unwrap_or_else(|| UNKNOWN.to_string()),
        notice_no: text_or_unknown(summons, "NoticeNo"),
        offence: summons
            .child_text("OffenceSection")
            .or_else(|| summons.child_text("OffenceDescription"))
            .unwrap_or(UNKNOWN)
            .to_string(),
        location: text_or_unknown(summons, "OffenceLocation"),
        offence_date: text_or_unknown(summons, "OffenceDate"),
        status: SummonsStatus::from_flag(summons.child("NoticeStatus").map(|s| s.text.as_str())),
        amount: parse_amount(summons.child_text("Amount")),
        due_date: text_or_unknown(summons, "DueDate"),
    }
}

/// Parses every summons in the response, paid or not, in document order.
///
/// A missing `Summons` list is a valid "nothing outstanding" answer; a missing
/// envelope, body, response or `Summonses` container is not.
pub fn normalize(raw_xml: &str) -> Result<Vec<SummonsRecord>, NormalizeError> {
    let envelope = parse_tree(raw_xml)?;
    if envelope.name != "Envelope" {
        return Err(NormalizeError::MissingElement("Envelope"));
    }
    let body = envelope
        .child("Body")
        .ok_or(NormalizeError::MissingElement("Body"))?;
    if let Some(fault) = body.child("Fault") {
        let reason = fault.child_text("faultstring").unwrap_or("unspecified");
        return Err(NormalizeError::Fault(reason.to_string()));
    }
    let response = body
        .child("Response")
        .ok_or(NormalizeError::MissingElement("Response"))?;
    let summonses = response
        .child("Summonses")
        .ok_or(NormalizeError::MissingElement("Summonses"))?;

    Ok(summonses.children_named("Summons").map(record_from).collect())
}
