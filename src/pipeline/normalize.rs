//! Normalisation: turn raw PDF text-layer output into paragraph-structured text.
//!
//! ## Why is normalisation necessary?
//!
//! pdfium reports the text layer line by line, exactly as it was laid out on
//! the page. The result is readable by eye but hostile to everything
//! downstream:
//!
//! - every visual line wrap is a hard `\n`, so one paragraph becomes ten lines
//! - words broken at the margin keep their hyphen (`опубли-` / `кованных`)
//! - kerning gaps split words (`developm ent`) and e-mail addresses
//!   (`druginfo@fda. hhs. gov`)
//! - page numbers, footnote markers and bullet glyphs float around freely
//!
//! ## Rule Order
//!
//! Rules run in a fixed order because each one assumes the shape produced by
//! the previous ones: paragraphs must exist before hyphenation repair can
//! refuse to cross them, punctuation spacing must run before URL repair so
//! the URL rule can undo the spaces it inserted inside addresses, and so on.
//! Running [`normalize`] on its own output is a no-op.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use tracing::debug;

/// Cleanup preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NormalizePreset {
    /// Reflow, hyphenation, word-split, bullet, punctuation and URL rules.
    #[default]
    Standard,
    /// Standard plus the line pass: page numbers, footnote markers and
    /// foreign-language paragraphs are dropped before reflow.
    Filtered,
}

/// Alphabet whose words count as "native" for foreign-run filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NativeAlphabet {
    /// Cyrillic letters (U+0400–U+04FF) and hyphen.
    #[default]
    Cyrillic,
    /// Basic Latin and Latin-1/Extended-A/B letters and hyphen.
    Latin,
}

impl NativeAlphabet {
    fn contains(self, c: char) -> bool {
        if !c.is_alphabetic() {
            return false;
        }
        match self {
            NativeAlphabet::Cyrillic => ('\u{0400}'..='\u{04FF}').contains(&c),
            NativeAlphabet::Latin => {
                c.is_ascii_alphabetic()
                    || (('\u{00C0}'..='\u{024F}').contains(&c) && c != '×' && c != '÷')
            }
        }
    }
}

/// Options for [`normalize`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizeOptions {
    /// Run the line pass ([`reflow_lines`]) before the paragraph rules.
    pub line_pass: bool,

    /// Line pass: drop lines made only of digits (page numbers).
    pub filter_page_numbers: bool,

    /// Line pass: drop paragraphs containing a run of foreign words.
    pub filter_foreign_runs: bool,

    /// Consecutive non-native words that poison a paragraph. Default: 3.
    pub foreign_run_threshold: usize,

    /// Alphabet treated as native by the foreign-run filter.
    pub native_alphabet: NativeAlphabet,

    /// Merge `developm ent`-style kerning splits.
    ///
    /// Heuristic: a short real word after a long one can be glued on by
    /// mistake when it is not in the stop-list.
    pub repair_word_splits: bool,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self::standard()
    }
}

impl NormalizeOptions {
    /// Create options from a preset.
    pub fn from_preset(preset: NormalizePreset) -> Self {
        match preset {
            NormalizePreset::Standard => Self::standard(),
            NormalizePreset::Filtered => Self::filtered(),
        }
    }

    /// Standard options: no line pass.
    pub fn standard() -> Self {
        Self {
            line_pass: false,
            filter_page_numbers: false,
            filter_foreign_runs: false,
            foreign_run_threshold: 3,
            native_alphabet: NativeAlphabet::Cyrillic,
            repair_word_splits: true,
        }
    }

    /// Filtered options: line pass with both filters enabled.
    pub fn filtered() -> Self {
        Self {
            line_pass: true,
            filter_page_numbers: true,
            filter_foreign_runs: true,
            ..Self::standard()
        }
    }
}

/// Apply all normalisation rules to raw extracted text.
///
/// Rules (applied in order):
/// 0. *(line pass only)* page numbers, markers, foreign runs, indentation
///    breaks and line-final hyphenation, see [`reflow_lines`]
/// 1. Normalise line endings (CRLF → LF) and trailing whitespace
/// 2. Collapse soft breaks (a lone `\n` becomes a space)
/// 3. Split into paragraphs separated by exactly one blank line
/// 4. Repair hyphenation when every fragment is lower-case, outside addresses
/// 5. Repair accidental word splits *(optional)*, outside addresses
/// 6. Put every `•` bullet on its own line
/// 7. Fix spacing around sentence punctuation
/// 8. Remove whitespace inside e-mail addresses and URLs
pub fn normalize(input: &str, options: &NormalizeOptions) -> String {
    let s = normalise_line_endings(input);
    let s = if options.line_pass {
        reflow_lines(&s, options)
    } else {
        s
    };
    let s = collapse_soft_breaks(&s);
    let s = split_paragraphs(&s);
    let s = outside_addresses(&s, repair_hyphenation);
    let s = if options.repair_word_splits {
        outside_addresses(&s, repair_word_splits)
    } else {
        s
    };
    let s = normalise_bullets(&s);
    let s = fix_punctuation_spacing(&s);
    let s = repair_urls_and_emails(&s);
    s.trim().to_string()
}

/// Split normalised text into its paragraphs.
pub fn paragraphs(text: &str) -> Vec<&str> {
    RE_PARAGRAPH_BREAK
        .split(text)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .split('\n')
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 2: Collapse soft breaks ─────────────────────────────────────────────

static RE_NEWLINE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n+").unwrap());

fn collapse_soft_breaks(input: &str) -> String {
    RE_NEWLINE_RUN
        .replace_all(input, |caps: &Captures<'_>| {
            if caps[0].len() > 1 {
                caps[0].to_string()
            } else {
                " ".to_string()
            }
        })
        .into_owned()
}

// ── Rule 3: Paragraph split ──────────────────────────────────────────────────

static RE_PARAGRAPH_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{2,}").unwrap());

fn split_paragraphs(input: &str) -> String {
    paragraphs(input).join("\n\n")
}

/// Whole whitespace-delimited tokens that already look like an address.
static RE_ADDRESS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:https?://|www\.)\S+|[\w.+-]+@\S+").unwrap());

/// Apply `rule` to the text between address tokens; the addresses are copied
/// through untouched. Hyphens in host names and mailbox names are real.
fn outside_addresses(input: &str, rule: fn(&str) -> String) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last = 0;
    for m in RE_ADDRESS.find_iter(input) {
        out.push_str(&rule(&input[last..m.start()]));
        out.push_str(m.as_str());
        last = m.end();
    }
    out.push_str(&rule(&input[last..]));
    out
}

// ── Rule 4: Hyphenation repair ───────────────────────────────────────────────
//
// A whole chain (`a-b-c`) is matched at once so that the rule is idempotent:
// either every fragment is lower-case and the chain collapses into one word,
// or the chain is a proper-noun compound and stays exactly as it was.

static RE_HYPHEN_CHAIN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[\p{Latin}\p{Cyrillic}]+(?:[ \t]*-[ \t]*[\p{Latin}\p{Cyrillic}]+)+").unwrap()
});

fn repair_hyphenation(input: &str) -> String {
    RE_HYPHEN_CHAIN
        .replace_all(input, |caps: &Captures<'_>| {
            let chain = &caps[0];
            let fragments: Vec<&str> = chain.split('-').map(str::trim).collect();
            if fragments
                .iter()
                .all(|f| !f.is_empty() && f.chars().all(char::is_lowercase))
            {
                fragments.concat()
            } else {
                chain.to_string()
            }
        })
        .into_owned()
}

// ── Rule 5: Accidental word-split repair ─────────────────────────────────────

/// Short words that are never glued onto the preceding word.
const STOP_WORDS: &[&str] = &[
    // English
    "a", "all", "an", "and", "any", "are", "as", "at", "be", "but", "by", "can", "did", "do",
    "few", "for", "had", "has", "he", "her", "him", "his", "how", "i", "if", "in", "is", "it",
    "its", "may", "me", "my", "new", "no", "nor", "not", "now", "of", "old", "on", "one", "or",
    "our", "out", "own", "per", "see", "she", "so", "the", "to", "too", "two", "up", "us",
    "use", "via", "was", "way", "we", "who", "why", "yes", "yet", "you",
    // Russian
    "а", "без", "бы", "в", "во", "вы", "да", "для", "до", "его", "её", "ее", "еще", "ещё",
    "же", "за", "и", "из", "или", "их", "к", "как", "ко", "ли", "мы", "на", "над", "не",
    "но", "о", "об", "он", "она", "они", "оно", "от", "по", "под", "при", "про", "с", "со",
    "так", "то", "ты", "у", "уже", "что", "это", "я",
];

static RE_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+|\S+").unwrap());

fn repair_word_splits(input: &str) -> String {
    input
        .split('\n')
        .map(repair_line_splits)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Single left-to-right pass; merges chain, so the result is a fixpoint.
fn repair_line_splits(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut pending_space = "";

    for piece in RE_TOKEN.find_iter(line).map(|m| m.as_str()) {
        if piece.starts_with(char::is_whitespace) {
            pending_space = piece;
            continue;
        }
        if !pending_space.is_empty() && trailing_word_len(&out) >= 4 && is_split_tail(piece) {
            out.push_str(piece);
        } else {
            out.push_str(pending_space);
            out.push_str(piece);
        }
        pending_space = "";
    }
    out.push_str(pending_space);
    out
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Length of the letter run ending `s`, or 0 when that run is glued to a
/// digit or underscore (i.e. it is not a whole word).
fn trailing_word_len(s: &str) -> usize {
    let mut rev = s.chars().rev().peekable();
    let mut len = 0;
    while rev.peek().is_some_and(|c| c.is_alphabetic()) {
        rev.next();
        len += 1;
    }
    match rev.next() {
        Some(c) if is_word_char(c) => 0,
        _ => len,
    }
}

/// A 1–3 letter word at the start of `token`, not in the stop-list.
fn is_split_tail(token: &str) -> bool {
    let letters: String = token.chars().take_while(|c| c.is_alphabetic()).collect();
    let len = letters.chars().count();
    if !(1..=3).contains(&len) {
        return false;
    }
    if token[letters.len()..].starts_with(is_word_char) {
        return false;
    }
    !STOP_WORDS.contains(&letters.to_lowercase().as_str())
}

// ── Rule 6: Bullets on their own line ────────────────────────────────────────

const BULLET: char = '•';

static RE_BULLET: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]*(\n*)[ \t]*•").unwrap());

fn normalise_bullets(input: &str) -> String {
    RE_BULLET
        .replace_all(input, |caps: &Captures<'_>| {
            let at_start = caps.get(0).is_some_and(|m| m.start() == 0);
            if at_start {
                BULLET.to_string()
            } else if !caps[1].is_empty() {
                format!("{}{}", &caps[1], BULLET)
            } else {
                format!("\n{}", BULLET)
            }
        })
        .into_owned()
}

// ── Rule 7: Punctuation spacing ──────────────────────────────────────────────

static RE_SPACE_BEFORE_PUNCT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[ \t]+([.,?!;:])").unwrap());
static RE_MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r" {2,}").unwrap());

fn is_sentence_punct(c: char) -> bool {
    matches!(c, '.' | ',' | '?' | '!' | ';' | ':')
}

fn fix_punctuation_spacing(input: &str) -> String {
    let s = RE_SPACE_BEFORE_PUNCT.replace_all(input, "$1");
    let s = space_after_punctuation(&s);
    RE_MULTI_SPACE.replace_all(&s, " ").into_owned()
}

/// Digit-punctuation-digit (`3.5`, `1,000`, `12:30`) is a number, not a
/// sentence boundary, and is left alone.
fn space_after_punctuation(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len() + 16);
    for (i, &c) in chars.iter().enumerate() {
        out.push(c);
        if !is_sentence_punct(c) {
            continue;
        }
        let Some(&next) = chars.get(i + 1) else {
            continue;
        };
        if !next.is_alphanumeric() {
            continue;
        }
        let prev_is_digit = i > 0 && chars[i - 1].is_ascii_digit();
        if prev_is_digit && next.is_ascii_digit() {
            continue;
        }
        out.push(' ');
    }
    out
}

// ── Rule 8: URL / e-mail repair ──────────────────────────────────────────────

static RE_EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\w.+-]+@[\w-]+(?:[ \t]*\.[ \t]*[a-z0-9-]+)+").unwrap());
static RE_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"https?://[\w-]+(?:[ \t]*[./?&=#:][ \t]*[\w%~+-]+)*/?").unwrap()
});

static RE_GAP: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+").unwrap());

/// Fragments accepted as the end of a host name after a `". "` gap.
const TOP_LEVEL_DOMAINS: &[&str] = &[
    "com", "org", "net", "gov", "edu", "mil", "info", "biz", "io", "uk", "ru", "de", "fr", "eu",
    "ca", "au", "jp", "cn", "ch", "nl", "se", "es", "pl", "ua", "kz", "рф",
];

fn repair_urls_and_emails(input: &str) -> String {
    let s = RE_EMAIL.replace_all(input, |caps: &Captures<'_>| repair_address(&caps[0]));
    RE_URL
        .replace_all(&s, |caps: &Captures<'_>| repair_address(&caps[0]))
        .into_owned()
}

fn repair_address(matched: &str) -> String {
    let end = address_len(matched);
    format!("{}{}", squeeze_token(&matched[..end]), &matched[end..])
}

/// Byte length of the part of a match that belongs to the address.
///
/// A gap right after a dot usually ends the sentence. It is bridged only
/// when the next fragment is followed by another dot or is a known
/// top-level domain (`fda. hhs. gov`), not when it is an ordinary word
/// (`x.com. then`).
fn address_len(matched: &str) -> usize {
    for gap in RE_GAP.find_iter(matched) {
        if !matched[..gap.start()].ends_with('.') {
            continue;
        }
        let rest = &matched[gap.end()..];
        let frag_len = rest
            .find(|c: char| !(c.is_alphanumeric() || c == '-' || c == '_'))
            .unwrap_or(rest.len());
        let fragment = rest[..frag_len].to_lowercase();
        let continues = rest[frag_len..].trim_start().starts_with('.');
        if !continues && !TOP_LEVEL_DOMAINS.contains(&fragment.as_str()) {
            return gap.start();
        }
    }
    matched.len()
}

/// Drop whitespace inside an address, except before a capitalised word:
/// that is the next sentence, not a kerning gap.
fn squeeze_token(token: &str) -> String {
    let mut out = String::with_capacity(token.len());
    let mut chars = token.chars().peekable();
    while let Some(c) = chars.next() {
        if !c.is_whitespace() {
            out.push(c);
            continue;
        }
        while chars.peek().is_some_and(|n| n.is_whitespace()) {
            chars.next();
        }
        if chars.peek().is_some_and(|n| n.is_uppercase()) {
            out.push(' ');
        }
    }
    out
}

// ── Line pass ────────────────────────────────────────────────────────────────

/// Dash variants accepted at the end of a line as a hyphenation mark.
const LINE_END_DASHES: &[char] = &[
    '\u{00AD}', '\u{2010}', '\u{2011}', '\u{2012}', '\u{2013}', '\u{2014}', '\u{2212}',
];

/// Rebuild paragraphs from raw lines, before soft-break collapse.
///
/// Works line by line:
/// - a line of only digits is a page number and vanishes without a trace
/// - `*` and free-standing numbers (footnote markers) are removed
/// - a blank line, or a line indented with a space or tab, ends the paragraph
/// - a line ending in `<letter>-` followed by a line starting lower-case is
///   joined without a space
/// - once [`NormalizeOptions::foreign_run_threshold`] consecutive words in
///   the paragraph are outside the native alphabet, the *whole* paragraph is
///   dropped, including the lines already collected
///
/// Returns paragraphs joined by a blank line, each on a single line.
pub fn reflow_lines(input: &str, options: &NormalizeOptions) -> String {
    let mut builder = ParagraphBuilder::new(options);

    for raw in input.lines() {
        if options.filter_page_numbers && is_page_number_line(raw) {
            continue;
        }
        if raw.trim().is_empty() {
            builder.flush();
            continue;
        }
        if raw.starts_with([' ', '\t']) {
            builder.flush();
        }
        let stripped = strip_markers(raw.trim());
        let line = stripped.trim();
        if line.is_empty() {
            continue;
        }
        builder.push_line(&normalise_line_end_dash(line));
    }

    builder.finish().join("\n\n")
}

fn is_page_number_line(line: &str) -> bool {
    let trimmed = line.trim();
    !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit() || c.is_whitespace())
}

/// Remove `*` and numeric tokens that do not touch a word character.
///
/// Decimal numbers (`3.5`, `1,000`) are one token and survive, since they
/// are not plain digit runs.
fn strip_markers(line: &str) -> String {
    let chars: Vec<char> = line.chars().filter(|&c| c != '*').collect();
    let mut out = String::with_capacity(line.len());
    let mut i = 0;

    while i < chars.len() {
        if !chars[i].is_ascii_digit() {
            out.push(chars[i]);
            i += 1;
            continue;
        }

        let start = i;
        let mut end = i;
        while end < chars.len()
            && (chars[end].is_ascii_digit()
                || (matches!(chars[end], '.' | ',')
                    && chars.get(end + 1).is_some_and(|c| c.is_ascii_digit())))
        {
            end += 1;
        }

        let token = &chars[start..end];
        let touches_word = (start > 0 && is_word_char(chars[start - 1]))
            || chars.get(end).is_some_and(|&c| is_word_char(c));
        let plain = token.iter().all(|c| c.is_ascii_digit());
        if !plain || touches_word {
            out.extend(token);
        }
        i = end;
    }

    out
}

fn normalise_line_end_dash(line: &str) -> Cow<'_, str> {
    let mut rev = line.chars().rev();
    match (rev.next(), rev.next()) {
        (Some(dash), Some(prev)) if LINE_END_DASHES.contains(&dash) && prev.is_alphabetic() => {
            let cut = line.len() - dash.len_utf8();
            Cow::Owned(format!("{}-", &line[..cut]))
        }
        _ => Cow::Borrowed(line),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WordClass {
    Native,
    Foreign,
    /// No letters at all (numbers, punctuation): does not affect the run.
    Neutral,
}

fn classify_word(word: &str, alphabet: NativeAlphabet) -> WordClass {
    let core = word.trim_matches(|c: char| !c.is_alphanumeric());
    if !core.chars().any(char::is_alphabetic) {
        return WordClass::Neutral;
    }
    if core.chars().all(|c| c == '-' || alphabet.contains(c)) {
        WordClass::Native
    } else {
        WordClass::Foreign
    }
}

struct ParagraphBuilder<'a> {
    options: &'a NormalizeOptions,
    paragraphs: Vec<String>,
    current: String,
    foreign_run: usize,
    poisoned: bool,
}

impl<'a> ParagraphBuilder<'a> {
    fn new(options: &'a NormalizeOptions) -> Self {
        Self {
            options,
            paragraphs: Vec::new(),
            current: String::new(),
            foreign_run: 0,
            poisoned: false,
        }
    }

    fn push_line(&mut self, line: &str) {
        if self.options.filter_foreign_runs {
            for word in line.split_whitespace() {
                match classify_word(word, self.options.native_alphabet) {
                    WordClass::Native => self.foreign_run = 0,
                    WordClass::Foreign => {
                        self.foreign_run += 1;
                        if self.foreign_run >= self.options.foreign_run_threshold {
                            self.poisoned = true;
                        }
                    }
                    WordClass::Neutral => {}
                }
            }
        }

        if self.ends_with_hyphenation() && line.starts_with(char::is_lowercase) {
            self.current.pop();
            self.current.push_str(line);
            return;
        }
        if !self.current.is_empty() {
            self.current.push(' ');
        }
        self.current.push_str(line);
    }

    fn ends_with_hyphenation(&self) -> bool {
        let mut rev = self.current.chars().rev();
        matches!((rev.next(), rev.next()), (Some('-'), Some(prev)) if prev.is_alphabetic())
    }

    fn flush(&mut self) {
        let paragraph = std::mem::take(&mut self.current);
        let paragraph = paragraph.trim();
        if self.poisoned {
            debug!(
                "Dropped paragraph with foreign-language run: {} chars",
                paragraph.len()
            );
        } else if !paragraph.is_empty() {
            self.paragraphs.push(paragraph.to_string());
        }
        self.foreign_run = 0;
        self.poisoned = false;
    }

    fn finish(mut self) -> Vec<String> {
        self.flush();
        self.paragraphs
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
