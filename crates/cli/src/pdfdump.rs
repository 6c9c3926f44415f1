//! pdfdump - dump PDF structure as XML
//!
//! Prints trailers, the merged cross-reference map, and objects with
//! their stream payloads.

use anyhow::{Context, bail};
use bytes::Bytes;
use clap::{ArgAction, ArgGroup, Parser, ValueEnum};
use folio_core::document::{SectionKind, XRefEntry};
use folio_core::{
    AccessLevel, DocumentContext, ErrorPolicy, ObjectId, PDFObject, ParseOptions, Reference,
};
use memmap2::Mmap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Escape special characters for XML output.
fn escape(s: &[u8]) -> String {
    let mut result = String::new();
    for &byte in s {
        match byte {
            b'&' => result.push_str("&amp;"),
            b'<' => result.push_str("&lt;"),
            b'>' => result.push_str("&gt;"),
            b'"' => result.push_str("&quot;"),
            b'\'' => result.push_str("&#39;"),
            b'\\' => result.push_str("&#92;"),
            0..=31 | 127..=255 => result.push_str(&format!("&#{byte};")),
            _ => result.push(byte as char),
        }
    }
    result
}

fn escape_str(s: &str) -> String {
    escape(s.as_bytes())
}

/// How stream payloads are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
enum StreamCodec {
    /// Properties only
    #[default]
    None,
    /// Stored bytes, still encrypted and encoded
    Raw,
    /// Decrypted and decoded bytes
    Binary,
    /// Properties plus the decoded bytes, XML-escaped
    Text,
}

fn dumpxml<W: Write>(
    out: &mut W,
    doc: &DocumentContext,
    obj: &PDFObject,
    codec: StreamCodec,
) -> anyhow::Result<()> {
    match obj {
        PDFObject::Null => write!(out, "<null />")?,
        PDFObject::Bool(b) => write!(out, "<boolean>{b}</boolean>")?,
        PDFObject::Int(n) => write!(out, "<number>{n}</number>")?,
        PDFObject::Real(n) => write!(out, "<number>{n}</number>")?,
        PDFObject::String(s) => {
            write!(out, r#"<string size="{}">{}</string>"#, s.len(), escape(s))?;
        }
        PDFObject::Name(name) => write!(out, "<literal>{}</literal>", escape_str(name))?,
        PDFObject::Array(arr) => {
            writeln!(out, r#"<list size="{}">"#, arr.len())?;
            for item in arr {
                dumpxml(out, doc, item, codec)?;
                writeln!(out)?;
            }
            write!(out, "</list>")?;
        }
        PDFObject::Dict(dict) => {
            writeln!(out, r#"<dict size="{}">"#, dict.len())?;
            for (k, v) in dict {
                writeln!(out, "<key>{}</key>", escape_str(k))?;
                write!(out, "<value>")?;
                dumpxml(out, doc, v, codec)?;
                writeln!(out, "</value>")?;
            }
            write!(out, "</dict>")?;
        }
        PDFObject::Stream(stream) => match codec {
            StreamCodec::Raw => out.write_all(stream.rawdata())?,
            StreamCodec::Binary => out.write_all(&doc.decode_stream(stream)?)?,
            StreamCodec::Text | StreamCodec::None => {
                writeln!(out, "<stream>")?;
                writeln!(out, "<props>")?;
                dumpxml(out, doc, &PDFObject::Dict(stream.attrs.clone()), codec)?;
                writeln!(out)?;
                writeln!(out, "</props>")?;
                if codec == StreamCodec::Text {
                    match doc.decode_stream(stream) {
                        Ok(data) => writeln!(
                            out,
                            r#"<data size="{}">{}</data>"#,
                            data.len(),
                            escape(&data)
                        )?,
                        Err(err) if doc.options().error_policy == ErrorPolicy::SkipObject => {
                            writeln!(out, r#"<data error="{}" />"#, escape_str(&err.to_string()))?;
                        }
                        Err(err) => return Err(err.into()),
                    }
                }
                write!(out, "</stream>")?;
            }
        },
        PDFObject::Ref(id) => {
            write!(out, r#"<ref id="{}" gen="{}" />"#, id.id, id.generation)?;
        }
    }
    Ok(())
}

/// One `<trailer>` per cross-reference section, newest first.
fn dumptrailers<W: Write>(out: &mut W, doc: &DocumentContext) -> anyhow::Result<()> {
    for section in doc.xref().sections() {
        let kind = match section.kind {
            SectionKind::Table => "table",
            SectionKind::Stream => "stream",
            SectionKind::Hybrid => "hybrid",
            SectionKind::Recovered => "recovered",
        };
        writeln!(
            out,
            r#"<trailer kind="{kind}" offset="{}" entries="{}">"#,
            section.offset, section.entries
        )?;
        dumpxml(out, doc, &PDFObject::Dict(section.trailer.clone()), StreamCodec::None)?;
        writeln!(out)?;
        writeln!(out, "</trailer>")?;
        writeln!(out)?;
    }
    if doc
        .xref()
        .sections()
        .iter()
        .all(|s| s.kind == SectionKind::Recovered)
    {
        tracing::warn!("no readable cross-reference chain; objects were found by scanning");
    }
    Ok(())
}

fn dumpxref<W: Write>(out: &mut W, doc: &DocumentContext) -> anyhow::Result<()> {
    writeln!(out, r#"<xref size="{}">"#, doc.xref().len())?;
    for (id, XRefEntry { generation, reference }) in doc.xref().entries() {
        match reference {
            Reference::Used { offset } => writeln!(
                out,
                r#"<entry id="{id}" gen="{generation}" type="used" offset="{offset}" />"#
            )?,
            Reference::Compressed { stream_id, index } => writeln!(
                out,
                r#"<entry id="{id}" gen="{generation}" type="compressed" stream="{stream_id}" index="{index}" />"#
            )?,
            Reference::Free { next_free_id } => writeln!(
                out,
                r#"<entry id="{id}" gen="{generation}" type="free" next="{next_free_id}" />"#
            )?,
        }
    }
    writeln!(out, "</xref>")?;
    Ok(())
}

fn dumpobject<W: Write>(
    out: &mut W,
    doc: &DocumentContext,
    id: ObjectId,
    codec: StreamCodec,
) -> anyhow::Result<()> {
    match doc.get_object_shared(id)? {
        Some(obj) => {
            if matches!(codec, StreamCodec::Raw | StreamCodec::Binary) {
                return dumpxml(out, doc, &obj, codec);
            }
            writeln!(out, r#"<object id="{}" gen="{}">"#, id.id, id.generation)?;
            dumpxml(out, doc, &obj, codec)?;
            writeln!(out)?;
            writeln!(out, "</object>")?;
            writeln!(out)?;
        }
        None => tracing::warn!(object = %id, "object not found"),
    }
    Ok(())
}

fn dumpallobjs<W: Write>(
    out: &mut W,
    doc: &DocumentContext,
    codec: StreamCodec,
) -> anyhow::Result<()> {
    write!(out, "<pdf>")?;
    for id in doc.object_ids() {
        dumpobject(out, doc, id, codec)?;
    }
    dumptrailers(out, doc)?;
    write!(out, "</pdf>")?;
    Ok(())
}

/// `12` or `12:3` (object number and generation).
fn parse_object_id(s: &str) -> Result<ObjectId, String> {
    let (id, generation) = s.split_once(':').unwrap_or((s, "0"));
    let id = id.trim().parse::<u32>().map_err(|e| format!("bad object number {id:?}: {e}"))?;
    let generation = generation
        .trim()
        .parse::<u16>()
        .map_err(|e| format!("bad generation {generation:?}: {e}"))?;
    Ok(ObjectId::new(id, generation))
}

/// Dump the internal structure of PDF files as XML.
#[derive(Parser, Debug)]
#[command(name = "pdfdump")]
#[command(author, version, about = "Dump PDF structure in XML format", long_about = None)]
#[command(group(ArgGroup::new("selection").args(["objects", "all"])))]
struct Args {
    /// One or more paths to PDF files
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Use debug logging level (overridden by RUST_LOG)
    #[arg(short = 'd', long, action = ArgAction::SetTrue)]
    debug: bool,

    /// The password to use for decrypting PDF file
    #[arg(short = 'P', long, default_value = "")]
    password: String,

    /// Print every cross-reference section's trailer
    #[arg(long, action = ArgAction::SetTrue)]
    trailer: bool,

    /// Print the merged cross-reference map
    #[arg(long, action = ArgAction::SetTrue)]
    xref: bool,

    /// Object to dump as `ID` or `ID:GEN`; repeatable
    #[arg(short = 'i', long = "object", value_parser = parse_object_id)]
    objects: Vec<ObjectId>,

    /// Dump all objects
    #[arg(short = 'a', long, action = ArgAction::SetTrue)]
    all: bool,

    /// How to write stream payloads
    #[arg(short = 's', long = "stream", value_enum, default_value_t)]
    stream: StreamCodec,

    /// Skip objects with unsupported filters or crypt methods instead of failing
    #[arg(long, action = ArgAction::SetTrue)]
    skip_unsupported: bool,

    /// Rebuild the cross-reference map by scanning when it is unreadable
    #[arg(long, action = ArgAction::SetTrue)]
    recover: bool,

    /// Path to file where output is written, or "-" for stdout
    #[arg(short = 'o', long, default_value = "-")]
    outfile: String,
}

fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.debug);

    let options = ParseOptions::new()
        .password(&args.password)
        .recover_xref(args.recover)
        .error_policy(if args.skip_unsupported {
            ErrorPolicy::SkipObject
        } else {
            ErrorPolicy::Strict
        });

    let mut output: Box<dyn Write> = if args.outfile == "-" {
        Box::new(BufWriter::new(io::stdout()))
    } else {
        let file = File::create(&args.outfile)
            .with_context(|| format!("cannot create {}", args.outfile))?;
        Box::new(BufWriter::new(file))
    };

    for path in &args.files {
        if !path.exists() {
            bail!("file not found: {}", path.display());
        }
        let file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
        // SAFETY: the map is read-only and dropped before the process exits;
        // concurrent truncation of the file is not supported.
        let mmap = unsafe { Mmap::map(&file) }?;
        let doc = DocumentContext::open(Bytes::from_owner(mmap), options.clone())
            .with_context(|| format!("cannot read {}", path.display()))?;
        if doc.is_encrypted() && doc.access_level() == AccessLevel::None {
            tracing::warn!(
                file = %path.display(),
                "wrong password; encrypted content will fail to decode"
            );
        }

        if args.all {
            dumpallobjs(&mut output, &doc, args.stream)?;
        } else {
            for &id in &args.objects {
                dumpobject(&mut output, &doc, id, args.stream)?;
            }
            if args.xref {
                dumpxref(&mut output, &doc)?;
            }
            if args.trailer || (args.objects.is_empty() && !args.xref) {
                dumptrailers(&mut output, &doc)?;
            }
        }
        if !matches!(args.stream, StreamCodec::Raw | StreamCodec::Binary) {
            writeln!(output)?;
        }
    }

    output.flush()?;
    Ok(())
}
