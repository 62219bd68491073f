use clap::Parser;
use serde::Serialize;
use std::fs;
use std::io::{self, Read};
use xpa_context::{
    DEFAULT_CHUNK_OVERLAP, DEFAULT_MAX_CHUNK_LENGTH, Document, Language, PROSE_DELIMITERS,
    TextContextBuilder,
};

/// Chunk a document into JSON, exactly as the index builder would.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the input text file. If not provided, reads from stdin.
    #[arg(short, long)]
    input: Option<String>,

    /// Document id attached to every chunk.
    #[arg(long, default_value = "unknown_document")]
    document_id: String,

    /// Document title, prepended to each passage.
    #[arg(short, long, default_value = "")]
    title: String,

    /// Document language (fr or en).
    #[arg(short, long, default_value = "en")]
    language: Language,

    /// Maximum length of a chunk in bytes, overlap included.
    #[arg(short, long, default_value_t = DEFAULT_MAX_CHUNK_LENGTH)]
    max_chunk_length: usize,

    /// Bytes of preceding text repeated at the start of each chunk.
    #[arg(short, long, default_value_t = DEFAULT_CHUNK_OVERLAP)]
    overlap: usize,

    /// Comma-separated list of regex patterns for delimiters.
    /// Defaults to prose delimiters if not provided.
    #[arg(short, long, value_delimiter = ',')]
    delimiters: Option<Vec<String>>,
}

#[derive(Serialize)]
struct SerializableTextChunk<'a> {
    document_id: &'a str,
    chunk_index: usize,
    language: Language,
    overlap_len: usize,
    chunk_text: &'a str,
    passage: String,
}

fn main() -> io::Result<()> {
    let args = Args::parse();

    let text = if let Some(input_path) = &args.input {
        fs::read_to_string(input_path)?
    } else {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    };

    let delimiter_patterns_owned: Vec<String> = match args.delimiters {
        Some(d) => d,
        None => PROSE_DELIMITERS.iter().map(|&s| s.to_string()).collect(),
    };
    let delimiter_patterns_refs: Vec<&str> = delimiter_patterns_owned
        .iter()
        .map(|s| s.as_str())
        .collect();

    let builder =
        TextContextBuilder::new(&delimiter_patterns_refs, args.max_chunk_length, args.overlap)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    let document = Document::new(args.document_id, args.title, args.language, text, "");
    let chunks = builder.chunk_document(&document);

    let serializable_chunks: Vec<SerializableTextChunk> = chunks
        .iter()
        .map(|c| SerializableTextChunk {
            document_id: &c.document_id,
            chunk_index: c.chunk_index,
            language: c.language,
            overlap_len: c.overlap_len,
            chunk_text: &c.chunk_text,
            passage: c.passage(),
        })
        .collect();

    let json_output = serde_json::to_string_pretty(&serializable_chunks)?;
    println!("{}", json_output);

    Ok(())
}
