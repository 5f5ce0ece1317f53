//! Diagnostic report rendering.
//!
//! Produces a small, fixed-layout PDF 1.4 document using the standard
//! Helvetica fonts, so no font data is embedded. Nothing time-dependent is
//! written: identical input gives byte-identical output.

use base64::{Engine as _, engine::general_purpose::STANDARD};

use crate::record::Record;

pub const DEFAULT_TITLE: &str = "Brain Scan Diagnostic Report";

// A4 in points
const PAGE_WIDTH: u32 = 595;
const PAGE_HEIGHT: u32 = 842;
const MARGIN_LEFT: u32 = 56;
const TOP: u32 = 770;
const BOTTOM: u32 = 56;

const TITLE_SIZE: u32 = 16;
const TITLE_ADVANCE: u32 = 28;
const TEXT_SIZE: u32 = 12;
const TEXT_ADVANCE: u32 = 18;

/// Characters per line for 12pt Helvetica across the text column.
const DEFAULT_WRAP: usize = 88;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Block {
    Title(String),
    Text(String),
    Gap(u32),
}

#[derive(Debug, Clone)]
pub struct ReportGenerator {
    title: String,
    wrap: usize,
}

impl Default for ReportGenerator {
    fn default() -> Self {
        Self {
            title: DEFAULT_TITLE.to_string(),
            wrap: DEFAULT_WRAP,
        }
    }
}

impl ReportGenerator {
    fn blocks<L, V>(&self, fields: &[(L, V)], diagnosis: &str) -> Vec<Block>
    where
        L: AsRef<str>,
        V: AsRef<str>,
    {
        let mut blocks = vec![Block::Title(self.title.clone()), Block::Gap(10)];

        for (label, value) in fields {
            let line = format!("{}: {}", label.as_ref(), value.as_ref());
            blocks.extend(wrap(&line, self.wrap).into_iter().map(Block::Text));
        }

        blocks.push(Block::Gap(5));
        blocks.push(Block::Text("Diagnosis:".to_string()));
        for paragraph in diagnosis.lines() {
            blocks.extend(wrap(paragraph, self.wrap).into_iter().map(Block::Text));
        }
        blocks
    }

    /// Visible text of the report, one entry per rendered line.
    pub fn layout<L, V>(&self, fields: &[(L, V)], diagnosis: &str) -> Vec<String>
    where
        L: AsRef<str>,
        V: AsRef<str>,
    {
        self.blocks(fields, diagnosis)
            .into_iter()
            .filter_map(|b| match b {
                Block::Title(s) | Block::Text(s) => Some(s),
                Block::Gap(_) => None,
            })
            .collect()
    }

    /// Renders title, one `label: value` line per field in the given order,
    /// then the diagnosis block.
    pub fn generate<L, V>(&self, fields: &[(L, V)], diagnosis: &str) -> Vec<u8>
    where
        L: AsRef<str>,
        V: AsRef<str>,
    {
        let blocks = self.blocks(fields, diagnosis);
        let pages = paginate(&blocks);
        write_pdf(&self.title, &pages)
    }

    pub fn generate_for(&self, record: &Record) -> Vec<u8> {
        self.generate(&record.patient_info().labelled_fields(), record.diagnosis())
    }
}

/// `<patient name>_report.pdf` with spaces and path separators replaced.
pub fn report_file_name(patient_name: &str) -> String {
    let stem: String = patient_name
        .trim()
        .chars()
        .map(|c| match c {
            ' ' | '/' | '\\' => '_',
            c => c,
        })
        .collect();
    if stem.is_empty() {
        "patient_report.pdf".to_string()
    } else {
        format!("{stem}_report.pdf")
    }
}

/// `data:` URI suitable for a download link.
pub fn data_uri(pdf: &[u8]) -> String {
    format!("data:application/pdf;base64,{}", STANDARD.encode(pdf))
}

/// Greedy word wrap; words longer than `width` are split.
fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();
        while word.len() > width {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            lines.push(word.drain(..width).collect());
        }
        let word: String = word.into_iter().collect();

        let needed = if current.is_empty() {
            word.chars().count()
        } else {
            current.chars().count() + 1 + word.chars().count()
        };
        if needed > width && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&word);
    }

    if !current.is_empty() || lines.is_empty() {
        lines.push(current);
    }
    lines
}

/// One text run placed on a page.
struct Placed<'a> {
    bold: bool,
    y: u32,
    text: &'a str,
}

fn paginate(blocks: &[Block]) -> Vec<Vec<Placed<'_>>> {
    let mut pages = vec![Vec::new()];
    let mut y = TOP;

    for block in blocks {
        let (advance, placed) = match block {
            Block::Title(t) => (TITLE_ADVANCE, Some((true, t.as_str()))),
            Block::Text(t) => (TEXT_ADVANCE, Some((false, t.as_str()))),
            Block::Gap(g) => (*g, None),
        };

        if let Some((bold, text)) = placed {
            if y < BOTTOM {
                pages.push(Vec::new());
                y = TOP;
            }
            if let Some(page) = pages.last_mut() {
                page.push(Placed { bold, y, text });
            }
        }
        y = y.saturating_sub(advance);
    }
    pages
}

/// PDF literal string body: delimiters escaped, Latin-1 as octal, the rest `?`.
fn pdf_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '(' | ')' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            ' '..='~' => out.push(c),
            '\t' => out.push(' '),
            '\u{a0}'..='\u{ff}' => out.push_str(&format!("\\{:03o}", c as u32)),
            c if c.is_control() => out.push(' '),
            _ => out.push('?'),
        }
    }
    out
}

fn content_stream(page: &[Placed<'_>]) -> String {
    let mut stream = String::new();
    for run in page {
        let (font, size) = if run.bold {
            ("F2", TITLE_SIZE)
        } else {
            ("F1", TEXT_SIZE)
        };
        stream.push_str(&format!(
            "BT\n/{font} {size} Tf\n{MARGIN_LEFT} {} Td\n({}) Tj\nET\n",
            run.y,
            pdf_string(run.text)
        ));
    }
    stream
}

fn write_pdf(title: &str, pages: &[Vec<Placed<'_>>]) -> Vec<u8> {
    // 1 catalog, 2 page tree, 3-4 fonts, 5 info, then page/content pairs
    const FIRST_PAGE_OBJ: usize = 6;
    let page_obj = |i: usize| FIRST_PAGE_OBJ + 2 * i;

    let mut objects: Vec<String> = Vec::new();
    objects.push("<< /Type /Catalog /Pages 2 0 R >>".to_string());

    let kids: Vec<String> = (0..pages.len())
        .map(|i| format!("{} 0 R", page_obj(i)))
        .collect();
    objects.push(format!(
        "<< /Type /Pages /Kids [{}] /Count {} >>",
        kids.join(" "),
        pages.len()
    ));
    objects.push(
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >>"
            .to_string(),
    );
    objects.push(
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica-Bold /Encoding /WinAnsiEncoding >>"
            .to_string(),
    );
    objects.push(format!(
        "<< /Title ({}) /Producer (neurovault) >>",
        pdf_string(title)
    ));

    for (i, page) in pages.iter().enumerate() {
        objects.push(format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {PAGE_WIDTH} {PAGE_HEIGHT}] \
             /Resources << /Font << /F1 3 0 R /F2 4 0 R >> >> /Contents {} 0 R >>",
            page_obj(i) + 1
        ));
        let stream = content_stream(page);
        objects.push(format!(
            "<< /Length {} >>\nstream\n{}\nendstream",
            stream.len(),
            stream
        ));
    }

    let mut out: Vec<u8> = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n%\xe2\xe3\xcf\xd3\n");

    let mut offsets = Vec::with_capacity(objects.len());
    for (i, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
    }

    let xref_offset = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n", objects.len() + 1).as_bytes());
    out.extend_from_slice(b"0000000000 65535 f \n");
    for offset in &offsets {
        out.extend_from_slice(format!("{offset:010} 00000 n \n").as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R /Info 5 0 R >>\nstartxref\n{}\n%%EOF\n",
            objects.len() + 1,
            xref_offset
        )
        .as_bytes(),
    );
    out
}
