use roundtable_models::{SessionInput, TranscriptEntry};

/// Everything an agent's user prompt is composed from.
#[derive(Debug, Clone, Copy)]
pub struct ContextParts<'a> {
    pub input: &'a SessionInput,
    pub news: Option<&'a str>,
    pub transcript: &'a [TranscriptEntry],
    pub final_agent: Option<&'a str>,
    /// Results of this turn's tool calls, appended verbatim.
    pub tool_results: Option<&'a str>,
}

/// Builds each agent's prompt under a character budget.
///
/// Oldest prose entries are dropped first, then oldest structured entries, then the
/// final agent's latest entry. The header (topic, shared context, news) is truncated last.
pub struct ContextAssembler {
    max_chars: usize,
}

impl ContextAssembler {
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }

    pub fn assemble(&self, parts: &ContextParts<'_>) -> String {
        let header = render_header(parts.input, parts.news);
        let tools = parts
            .tool_results
            .map(|t| format!("\n{t}"))
            .unwrap_or_default();

        let spoken: Vec<&TranscriptEntry> =
            parts.transcript.iter().filter(|e| e.is_spoken()).collect();
        let final_latest = parts.final_agent.and_then(|name| {
            spoken
                .iter()
                .rev()
                .find(|e| e.name == name)
                .map(|e| e.seq)
        });
        let rendered: Vec<String> = spoken.iter().map(|e| render_entry(e)).collect();

        let mut keep = vec![true; spoken.len()];
        let mut total = char_len(&header)
            + TRANSCRIPT_LABEL.len()
            + char_len(&tools)
            + rendered.iter().map(|r| char_len(r)).sum::<usize>();

        if total > self.max_chars {
            let mut drop_order: Vec<usize> = (0..spoken.len()).collect();
            drop_order.sort_by_key(|&i| {
                let entry = spoken[i];
                let rank = if Some(entry.seq) == final_latest {
                    2
                } else if entry.has_structured_payload() {
                    1
                } else {
                    0
                };
                (rank, entry.seq)
            });
            for i in drop_order {
                if total <= self.max_chars {
                    break;
                }
                keep[i] = false;
                total -= char_len(&rendered[i]);
            }
        }

        let history: String = rendered
            .iter()
            .zip(&keep)
            .filter(|(_, kept)| **kept)
            .map(|(r, _)| r.as_str())
            .collect();

        let fixed = TRANSCRIPT_LABEL.len() + char_len(&history) + char_len(&tools);
        let header = truncate_chars(&header, self.max_chars.saturating_sub(fixed));

        let prompt = format!("{header}{TRANSCRIPT_LABEL}{history}{tools}");
        truncate_chars(&prompt, self.max_chars)
    }
}

const TRANSCRIPT_LABEL: &str = "\n\n## Transcript\n";

fn render_header(input: &SessionInput, news: Option<&str>) -> String {
    let mut header = format!("# Topic\n{}\n", input.topic);
    if !input.context.trim().is_empty() {
        header.push_str(&format!("\n## Shared context\n{}\n", input.context.trim()));
    }
    if let Some(news) = news.filter(|n| !n.trim().is_empty()) {
        header.push_str(&format!("\n## News digest\n{}\n", news.trim()));
    }
    header
}

fn render_entry(entry: &TranscriptEntry) -> String {
    format!(
        "\n[#{}] {} ({}) | {} | turn {}\n{}\n",
        entry.seq,
        entry.name,
        entry.role,
        entry.phase.as_str(),
        entry.turn,
        entry.text
    )
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
