// src/hypervisor/domain.rs

//! Domain definition rewriting
//!
//! A build job starts from the template's declarative XML definition and
//! produces a derived one in a single streaming pass:
//!
//! - `/domain/name` becomes the job-prefixed clone name
//! - `/domain/uuid` becomes a freshly generated UUID
//! - the `mac` of the `network` interface gets a randomized address
//! - every `disk device="disk"` source is redirected to a job-private
//!   overlay file (recording the base image so the caller can create it)
//! - a `serial type="pipe"` console is appended to `devices`, bound to the
//!   job's host-side pipe on port 1
//! - GUI templates get a qemu commandline block that disables audio
//!
//! The template image paths are only ever read; the rewrite refuses any
//! disk that is not a file-backed qcow2 image, since nothing else can serve
//! as a copy-on-write backing file.

use crate::{Error, Result};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use rand::Rng;
use std::path::{Path, PathBuf};

const QEMU_NS: &str = "http://libvirt.org/schemas/domain/qemu/1.0";

/// Fields the rewrite substitutes into the template definition
pub struct RewriteSpec<'a> {
    /// New domain name, always carrying the job prefix
    pub domain_name: &'a str,
    /// Freshly generated UUID; the rewrite fails if it matches the template's
    pub uuid: &'a str,
    /// Randomized MAC address for the network interface
    pub mac: &'a str,
    /// Directory the per-disk overlay images live in
    pub overlay_dir: &'a Path,
    /// Base path of the host-side console pipe (`<path>.out` / `<path>.in`)
    pub console_pipe: &'a Path,
    /// Disable audio emulation (GUI templates)
    pub disable_audio: bool,
}

/// One disk to clone: template base image and the job-private overlay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskClone {
    pub base: PathBuf,
    pub overlay: PathBuf,
}

/// Result of a definition rewrite
#[derive(Debug)]
pub struct Rewritten {
    pub xml: String,
    pub disks: Vec<DiskClone>,
}

/// Generate a MAC address in the locally administered 00:16:3e range.
///
/// Uniqueness against other registered domains is probabilistic only; the
/// sampled space holds ~8.4M addresses and build domains are short-lived.
pub fn random_mac() -> String {
    let mut rng = rand::thread_rng();
    format!(
        "00:16:3e:{:02x}:{:02x}:{:02x}",
        rng.gen_range(0x00..=0x7fu8),
        rng.gen_range(0x00..=0xffu8),
        rng.gen_range(0x00..=0xffu8)
    )
}

/// Copy a start tag, replacing the value of one attribute.
///
/// The attribute is appended if the source element does not carry it.
fn with_attr(e: &BytesStart, key: &[u8], value: &str) -> Result<BytesStart<'static>> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut out = BytesStart::new(name);
    let mut replaced = false;
    for attr in e.attributes() {
        let attr = attr.map_err(|err| Error::Xml(err.to_string()))?;
        if attr.key.as_ref() == key {
            out.push_attribute((key, value.as_bytes()));
            replaced = true;
        } else {
            out.push_attribute((attr.key.as_ref(), attr.value.as_ref()));
        }
    }
    if !replaced {
        out.push_attribute((key, value.as_bytes()));
    }
    Ok(out)
}

fn attr_value(e: &BytesStart, key: &[u8]) -> Result<Option<String>> {
    for attr in e.attributes() {
        let attr = attr.map_err(|err| Error::Xml(err.to_string()))?;
        if attr.key.as_ref() == key {
            return Ok(Some(String::from_utf8_lossy(&attr.value).into_owned()));
        }
    }
    Ok(None)
}

/// Rewrite a template domain definition for a build job.
///
/// Returns the derived XML and the list of disk overlays the caller must
/// create before defining the domain.
pub fn rewrite_definition(xml: &str, spec: &RewriteSpec) -> Result<Rewritten> {
    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new(Vec::new());

    // Element path of the parents of the event currently being handled
    let mut stack: Vec<String> = Vec::new();
    let mut in_network_interface = false;
    let mut in_cloned_disk = false;

    let mut disks = Vec::new();
    let mut found_name = false;
    let mut found_uuid = false;
    let mut found_mac = false;
    let mut found_devices = false;

    loop {
        let event = reader.read_event()?;
        match event {
            Event::Start(ref e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                let at_root = stack.is_empty();
                let in_domain = stack.len() == 1 && stack[0] == "domain";
                let in_devices =
                    stack.len() == 2 && stack[0] == "domain" && stack[1] == "devices";
                let parent_is_disk = stack.last().is_some_and(|p| p == "disk");
                let parent_is_interface = stack.last().is_some_and(|p| p == "interface");

                // Replace the text of <name> and <uuid> wholesale: write our
                // value and drain the template's original content.
                if in_domain && name == "name" {
                    found_name = true;
                    writer.write_event(Event::Start(e.to_owned()))?;
                    writer.write_event(Event::Text(BytesText::new(spec.domain_name)))?;
                    drain_text_element(&mut reader, "name")?;
                    writer.write_event(Event::End(BytesEnd::new("name")))?;
                    continue;
                }
                if in_domain && name == "uuid" {
                    found_uuid = true;
                    writer.write_event(Event::Start(e.to_owned()))?;
                    writer.write_event(Event::Text(BytesText::new(spec.uuid)))?;
                    let template_uuid = drain_text_element(&mut reader, "uuid")?;
                    if template_uuid.trim() == spec.uuid {
                        return Err(Error::Config(format!(
                            "generated UUID {} collides with the template's",
                            spec.uuid
                        )));
                    }
                    writer.write_event(Event::End(BytesEnd::new("uuid")))?;
                    continue;
                }
                if at_root && name == "domain" && spec.disable_audio {
                    // The qemu extension block needs its namespace declared
                    // on the root element.
                    let out = if attr_value(e, b"xmlns:qemu")?.is_some() {
                        e.to_owned()
                    } else {
                        let mut out = e.to_owned();
                        out.push_attribute(("xmlns:qemu", QEMU_NS));
                        out
                    };
                    stack.push(name);
                    writer.write_event(Event::Start(out))?;
                    continue;
                }
                if in_devices && name == "interface" {
                    in_network_interface = attr_value(e, b"type")?.as_deref() == Some("network");
                } else if in_devices && name == "disk" {
                    in_cloned_disk = attr_value(e, b"device")?.as_deref() == Some("disk");
                } else if parent_is_disk && name == "source" && in_cloned_disk {
                    let out = rewrite_disk_source(e, spec, &mut disks)?;
                    stack.push(name);
                    writer.write_event(Event::Start(out))?;
                    continue;
                } else if parent_is_interface && name == "mac" && in_network_interface {
                    found_mac = true;
                    let out = with_attr(e, b"address", spec.mac)?;
                    stack.push(name);
                    writer.write_event(Event::Start(out))?;
                    continue;
                }

                stack.push(name);
                writer.write_event(event)?;
            }

            Event::Empty(ref e) => {
                let name = e.name();
                if name.as_ref() == b"source"
                    && in_cloned_disk
                    && stack.last().is_some_and(|p| p == "disk")
                {
                    let out = rewrite_disk_source(e, spec, &mut disks)?;
                    writer.write_event(Event::Empty(out))?;
                } else if name.as_ref() == b"mac"
                    && in_network_interface
                    && stack.last().is_some_and(|p| p == "interface")
                {
                    found_mac = true;
                    let out = with_attr(e, b"address", spec.mac)?;
                    writer.write_event(Event::Empty(out))?;
                } else {
                    writer.write_event(event)?;
                }
            }

            Event::End(ref e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                match (stack.as_slice(), name.as_str()) {
                    ([d, _], "devices") if d == "domain" => {
                        found_devices = true;
                        write_console_serial(&mut writer, spec.console_pipe)?;
                    }
                    ([_], "domain") if spec.disable_audio => {
                        write_audio_override(&mut writer)?;
                    }
                    _ => {}
                }
                match name.as_str() {
                    "interface" => in_network_interface = false,
                    "disk" => in_cloned_disk = false,
                    _ => {}
                }
                stack.pop();
                writer.write_event(event)?;
            }

            Event::Eof => break,

            other => writer.write_event(other)?,
        }
    }

    if !found_name || !found_uuid {
        return Err(Error::Xml(
            "definition has no <name> or <uuid> element".to_string(),
        ));
    }
    if !found_mac {
        return Err(Error::Xml(
            "definition has no network interface MAC".to_string(),
        ));
    }
    if !found_devices {
        return Err(Error::Xml("definition has no <devices> element".to_string()));
    }

    let xml = String::from_utf8(writer.into_inner())
        .map_err(|e| Error::Xml(format!("rewritten definition is not UTF-8: {e}")))?;

    Ok(Rewritten { xml, disks })
}

/// Validate a cloned disk's source and redirect it to the job overlay
fn rewrite_disk_source(
    e: &BytesStart,
    spec: &RewriteSpec,
    disks: &mut Vec<DiskClone>,
) -> Result<BytesStart<'static>> {
    let base = attr_value(e, b"file")?.ok_or_else(|| {
        Error::UnsupportedFormat("disk source is not a file-backed image".to_string())
    })?;
    if !base.ends_with(".qcow2") {
        return Err(Error::UnsupportedFormat(format!(
            "{base}: only qcow2 template disks can back an overlay"
        )));
    }

    let overlay = spec.overlay_dir.join(format!("disk{}.qcow2", disks.len()));
    let out = with_attr(e, b"file", &overlay.to_string_lossy())?;
    disks.push(DiskClone {
        base: PathBuf::from(base),
        overlay,
    });
    Ok(out)
}

/// Consume the remaining content of a text-only element, returning its text
fn drain_text_element(reader: &mut Reader<&[u8]>, name: &str) -> Result<String> {
    let mut text = String::new();
    loop {
        match reader.read_event()? {
            Event::Text(t) => {
                text.push_str(&t.unescape().map_err(|e| Error::Xml(e.to_string()))?);
            }
            Event::CData(t) => text.push_str(&String::from_utf8_lossy(&t)),
            Event::End(e) if e.name().as_ref() == name.as_bytes() => return Ok(text),
            Event::Eof => {
                return Err(Error::Xml(format!("unterminated <{name}> element")));
            }
            _ => {}
        }
    }
}

/// Append the host-pipe serial console to the devices block
fn write_console_serial(writer: &mut Writer<Vec<u8>>, pipe: &Path) -> Result<()> {
    let mut serial = BytesStart::new("serial");
    serial.push_attribute(("type", "pipe"));
    writer.write_event(Event::Start(serial))?;

    let mut source = BytesStart::new("source");
    source.push_attribute(("path", pipe.to_string_lossy().as_ref()));
    writer.write_event(Event::Empty(source))?;

    let mut target = BytesStart::new("target");
    target.push_attribute(("port", "1"));
    writer.write_event(Event::Empty(target))?;

    writer.write_event(Event::End(BytesEnd::new("serial")))?;
    Ok(())
}

/// Append the qemu commandline block that turns audio emulation off
fn write_audio_override(writer: &mut Writer<Vec<u8>>) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new("qemu:commandline")))?;

    let mut env = BytesStart::new("qemu:env");
    env.push_attribute(("name", "QEMU_AUDIO_DRV"));
    env.push_attribute(("value", "none"));
    writer.write_event(Event::Empty(env))?;

    writer.write_event(Event::End(BytesEnd::new("qemu:commandline")))?;
    Ok(())
}
