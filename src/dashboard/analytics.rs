//! Views over a dataset: overview KPIs, sentiment distribution, keywords,
//! drilldown and explore filters.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

use super::dataset::{Dataset, Row, EPISODE_COLUMN};

pub const ALL_EPISODES: &str = "All episodes";
pub const ALL_SENTIMENTS: &str = "all";
pub const NO_KEYWORD: &str = "(none)";
pub const KEYWORD_LABELS: [&str; 3] = ["positive", "neutral", "negative"];
pub const TOP_N_RANGE: (usize, usize) = (5, 50);
pub const MIN_LEN_RANGE: (usize, usize) = (2, 6);
pub const DEFAULT_TOP_N: usize = 20;
pub const DEFAULT_MIN_LEN: usize = 3;
pub const DRILLDOWN_KEYWORDS: usize = 50;
pub const PREVIEW_ROWS: usize = 50;

/// Preferred columns for comment tables, in display order
pub const DISPLAY_COLUMNS: [&str; 14] = [
    "episode_title",
    "author",
    "text",
    "sentiment",
    "emotion",
    "confidence",
    "sentiment_score",
    "bert_score",
    "lexicon_label",
    "lexicon_score",
    "vader_label",
    "vader_score",
    "published_at",
    "like_count",
];

static URL: Lazy<Regex> = Lazy::new(|| Regex::new(r"http\S+|www\.\S+").expect("valid url regex"));
static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-zA-Z']+").expect("valid word regex"));

static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    "a an and are as at be but by for from has have he her hers him his i if in into is it its \
     just me my no not of on or our ours she so that the their them then there these they this to \
     too up was we were what when where which who will with you your yours"
        .split_whitespace()
        .collect()
});

/// Rows of the chosen episode; `None` or `All episodes` keeps everything.
pub fn filter_episode<'a>(dataset: &'a Dataset, episode: Option<&str>) -> Vec<&'a Row> {
    match episode.filter(|e| !e.is_empty() && *e != ALL_EPISODES) {
        Some(ep) if dataset.has_episodes => dataset.rows.iter().filter(|r| r.episode == ep).collect(),
        _ => dataset.rows.iter().collect(),
    }
}

/// `All episodes` followed by the sorted distinct, non-blank episode titles
pub fn episode_options(dataset: &Dataset) -> Vec<String> {
    let mut episodes: Vec<String> = dataset
        .rows
        .iter()
        .filter(|r| !r.episode.trim().is_empty())
        .map(|r| r.episode.clone())
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    episodes.sort();
    std::iter::once(ALL_EPISODES.to_string()).chain(episodes).collect()
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Overview {
    pub total: usize,
    /// `None` when the dataset has no sentiment column
    pub positive_pct: Option<f64>,
    pub neutral_pct: Option<f64>,
    pub negative_pct: Option<f64>,
}

impl Overview {
    pub fn display(pct: Option<f64>) -> String {
        match pct {
            Some(p) => format!("{:.1}%", p),
            None => "—".to_string(),
        }
    }
}

pub fn overview(rows: &[&Row], has_sentiment: bool) -> Overview {
    let total = rows.len();
    let pct = |label: &str| {
        if !has_sentiment {
            return None;
        }
        if total == 0 {
            return Some(0.0);
        }
        let n = rows.iter().filter(|r| r.sentiment == label).count();
        Some(n as f64 / total as f64 * 100.0)
    };
    Overview {
        total,
        positive_pct: pct("positive"),
        neutral_pct: pct("neutral"),
        negative_pct: pct("negative"),
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SentimentCount {
    pub sentiment: String,
    pub count: usize,
    /// Share of all rows, two decimals
    pub percentage: f64,
}

/// Count per sentiment value, most common first
pub fn sentiment_distribution(rows: &[&Row]) -> Vec<SentimentCount> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for row in rows {
        *counts.entry(row.sentiment.as_str()).or_default() += 1;
    }
    let total = rows.len().max(1) as f64;
    let mut out: Vec<SentimentCount> = counts
        .into_iter()
        .map(|(sentiment, count)| SentimentCount {
            sentiment: sentiment.to_string(),
            count,
            percentage: round2(count as f64 / total * 100.0),
        })
        .collect();
    // ties broken by name so the order is stable
    out.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.sentiment.cmp(&b.sentiment)));
    out
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Lowercase, drop URLs, keep runs of letters and apostrophes
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let without_urls = URL.replace_all(&lowered, " ");
    WORD.find_iter(&without_urls).map(|m| m.as_str().to_string()).collect()
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct KeywordCount {
    pub keyword: String,
    pub count: usize,
}

/// Most frequent keywords; ties keep first-seen order.
pub fn top_keywords<'a, I>(texts: I, top_n: usize, min_len: usize) -> Vec<KeywordCount>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    let mut next_rank = 0usize;
    for text in texts {
        for word in tokenize(text) {
            if word.chars().count() < min_len || STOPWORDS.contains(word.as_str()) {
                continue;
            }
            let entry = counts.entry(word).or_insert_with(|| {
                next_rank += 1;
                (0, next_rank)
            });
            entry.0 += 1;
        }
    }
    let mut ranked: Vec<(String, (usize, usize))> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.1 .1.cmp(&b.1 .1)));
    ranked
        .into_iter()
        .take(top_n)
        .map(|(keyword, (count, _))| KeywordCount { keyword, count })
        .collect()
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct KeywordGroup {
    /// `positive`, `neutral`, `negative`, or `all` without a sentiment column
    pub label: String,
    pub keywords: Vec<KeywordCount>,
}

/// Keyword tables per sentiment, or one combined table
pub fn keyword_groups(rows: &[&Row], has_sentiment: bool, top_n: usize, min_len: usize) -> Vec<KeywordGroup> {
    if !has_sentiment {
        return vec![KeywordGroup {
            label: ALL_SENTIMENTS.to_string(),
            keywords: top_keywords(rows.iter().map(|r| r.text.as_str()), top_n, min_len),
        }];
    }
    KEYWORD_LABELS
        .iter()
        .map(|label| KeywordGroup {
            label: label.to_string(),
            keywords: top_keywords(
                rows.iter().filter(|r| r.sentiment == *label).map(|r| r.text.as_str()),
                top_n,
                min_len,
            ),
        })
        .collect()
}

/// Keyword choices for the drilldown, from all rows in view
pub fn drilldown_options(rows: &[&Row], min_len: usize) -> Vec<String> {
    std::iter::once(NO_KEYWORD.to_string())
        .chain(
            top_keywords(rows.iter().map(|r| r.text.as_str()), DRILLDOWN_KEYWORDS, min_len)
                .into_iter()
                .map(|k| k.keyword),
        )
        .collect()
}

fn contains_ci(haystack: &str, needle_lower: &str) -> bool {
    haystack.to_lowercase().contains(needle_lower)
}

/// Rows whose text contains `keyword`, case-insensitive; no keyword keeps all.
/// The keyword is matched literally, never as a regular expression.
pub fn drilldown<'a>(rows: &[&'a Row], keyword: Option<&str>) -> Vec<&'a Row> {
    match keyword.map(str::trim).filter(|k| !k.is_empty() && *k != NO_KEYWORD) {
        Some(k) => {
            let needle = k.to_lowercase();
            rows.iter().copied().filter(|r| contains_ci(&r.text, &needle)).collect()
        }
        None => rows.to_vec(),
    }
}

/// Sentiment filter plus free-text search. The search is a literal,
/// case-insensitive substring match; regex metacharacters have no meaning.
pub fn explore<'a>(rows: &[&'a Row], has_sentiment: bool, sentiment: Option<&str>, query: Option<&str>) -> Vec<&'a Row> {
    let sentiment = sentiment
        .map(|s| s.trim().to_lowercase())
        .filter(|s| has_sentiment && !s.is_empty() && s != ALL_SENTIMENTS);
    let needle = query.map(|q| q.trim().to_lowercase()).filter(|q| !q.is_empty());

    rows.iter()
        .copied()
        .filter(|r| sentiment.as_ref().map_or(true, |s| &r.sentiment == s))
        .filter(|r| needle.as_ref().map_or(true, |n| contains_ci(&r.text, n)))
        .collect()
}

/// A rendered comment table
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Comment table with the preferred columns that exist in this dataset.
/// `text`, `sentiment` and `episode_title` show the resolved values.
pub fn comment_table(dataset: &Dataset, rows: &[&Row]) -> Table {
    enum Source {
        Text,
        Sentiment,
        Episode,
        Cell(usize),
    }

    let mut columns = Vec::new();
    let mut sources = Vec::new();
    for name in DISPLAY_COLUMNS {
        let source = match name {
            "text" => Some(Source::Text),
            "sentiment" => Some(Source::Sentiment),
            EPISODE_COLUMN => Some(Source::Episode),
            other => dataset.column_index(other).map(Source::Cell),
        };
        if let Some(source) = source {
            columns.push(name.to_string());
            sources.push(source);
        }
    }

    let rows = rows
        .iter()
        .map(|row| {
            sources
                .iter()
                .map(|source| match source {
                    Source::Text => row.text.clone(),
                    Source::Sentiment => row.sentiment.clone(),
                    Source::Episode => row.episode.clone(),
                    Source::Cell(i) => row.cells.get(*i).cloned().unwrap_or_default(),
                })
                .collect()
        })
        .collect();
    Table { columns, rows }
}

/// First rows in view with every column of the dataset
pub fn raw_preview(dataset: &Dataset, rows: &[&Row]) -> Table {
    Table {
        columns: dataset.columns.clone(),
        rows: rows.iter().take(PREVIEW_ROWS).map(|r| r.cells.clone()).collect(),
    }
}

pub fn clamp_top_n(value: Option<usize>) -> usize {
    value.unwrap_or(DEFAULT_TOP_N).clamp(TOP_N_RANGE.0, TOP_N_RANGE.1)
}

pub fn clamp_min_len(value: Option<usize>) -> usize {
    value.unwrap_or(DEFAULT_MIN_LEN).clamp(MIN_LEN_RANGE.0, MIN_LEN_RANGE.1)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "\
episode_title,author,text,sentiment,like_count
Ep 2,ann,Loved the guest! Loved it,positive,3
Ep 1,bob,The audio was rough,negative,0
Ep 1,cy,Guest was great https://example.com/x,Positive,1
Ep 2,dee,Okay episode,neutral,
";

    fn dataset() -> Dataset {
        Dataset::from_bytes(CSV.as_bytes(), "test").unwrap()
    }

    #[test]
    fn episodes_filter_and_options() {
        let ds = dataset();
        assert_eq!(episode_options(&ds), vec!["All episodes", "Ep 1", "Ep 2"]);
        assert_eq!(filter_episode(&ds, Some("Ep 1")).len(), 2);
        assert_eq!(filter_episode(&ds, Some(ALL_EPISODES)).len(), 4);
        assert_eq!(filter_episode(&ds, None).len(), 4);
    }

    #[test]
    fn blank_episodes_are_not_options() {
        let ds = Dataset::from_bytes(b"episode_title,text\nEp 1,hi\n,untitled\n  ,spaces\n", "t").unwrap();
        assert_eq!(episode_options(&ds), vec!["All episodes", "Ep 1"]);
    }

    #[test]
    fn search_is_literal_not_regex() {
        let ds = Dataset::from_bytes(b"text\nwhat? (really)\nwhat really\n", "t").unwrap();
        let rows = filter_episode(&ds, None);
        assert_eq!(explore(&rows, false, None, Some("? (REALLY")).len(), 1);
        assert_eq!(drilldown(&rows, Some("what.")).len(), 0);
    }

    #[test]
    fn overview_percentages() {
        let ds = dataset();
        let rows = filter_episode(&ds, None);
        let o = overview(&rows, true);
        assert_eq!(o.total, 4);
        assert_eq!(Overview::display(o.positive_pct), "50.0%");
        assert_eq!(Overview::display(o.neutral_pct), "25.0%");
        assert_eq!(Overview::display(overview(&rows, false).negative_pct), "—");
    }

    #[test]
    fn distribution_sorted_by_count() {
        let ds = Dataset::from_bytes(b"text,sentiment\na,positive\nb,negative\nc,positive\n", "t").unwrap();
        let rows = filter_episode(&ds, None);
        let dist = sentiment_distribution(&rows);
        assert_eq!(dist[0].sentiment, "positive");
        assert_eq!(dist[0].count, 2);
        assert_eq!(dist[0].percentage, 66.67);
        assert_eq!(dist[1].percentage, 33.33);
    }

    #[test]
    fn tokenizer_strips_urls() {
        assert_eq!(
            tokenize("Check www.site.com and HTTPS://x.y/z it's GREAT"),
            vec!["check", "and", "it's", "great"]
        );
    }

    #[test]
    fn keywords_count_desc_ties_first_seen() {
        let texts = ["zebra apple", "apple mango zebra", "mango kiwi"];
        let top = top_keywords(texts.iter().copied(), 3, 3);
        let words: Vec<_> = top.iter().map(|k| (k.keyword.as_str(), k.count)).collect();
        assert_eq!(words, vec![("zebra", 2), ("apple", 2), ("mango", 2)]);
    }

    #[test]
    fn keywords_respect_min_len_and_stopwords() {
        let top = top_keywords(["the guest and an ox were on"].into_iter(), 10, 2);
        let words: Vec<_> = top.iter().map(|k| k.keyword.as_str()).collect();
        assert_eq!(words, vec!["guest", "ox"]);
    }

    #[test]
    fn keyword_groups_by_sentiment() {
        let ds = dataset();
        let rows = filter_episode(&ds, None);
        let groups = keyword_groups(&rows, true, 5, 3);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].label, "positive");
        let positive: Vec<_> = groups[0].keywords.iter().map(|k| (k.keyword.as_str(), k.count)).collect();
        assert_eq!(positive, vec![("loved", 2), ("guest", 2), ("great", 1)]);
        assert_eq!(keyword_groups(&rows, false, 5, 3)[0].label, "all");
    }

    #[test]
    fn drilldown_and_explore() {
        let ds = dataset();
        let rows = filter_episode(&ds, None);
        assert_eq!(drilldown_options(&rows, 3)[0], NO_KEYWORD);
        assert_eq!(drilldown(&rows, Some("GUEST")).len(), 2);
        assert_eq!(drilldown(&rows, Some(NO_KEYWORD)).len(), 4);

        assert_eq!(explore(&rows, true, Some("positive"), None).len(), 2);
        assert_eq!(explore(&rows, true, Some("all"), Some("  audio ")).len(), 1);
        // sentiment filter is ignored without a sentiment column
        assert_eq!(explore(&rows, false, Some("negative"), None).len(), 4);
    }

    #[test]
    fn comment_table_uses_present_columns() {
        let ds = dataset();
        let rows = filter_episode(&ds, Some("Ep 1"));
        let table = comment_table(&ds, &rows);
        assert_eq!(table.columns, vec!["episode_title", "author", "text", "sentiment", "like_count"]);
        assert_eq!(table.rows[1][3], "positive");
        assert_eq!(raw_preview(&ds, &rows).rows.len(), 2);
        assert_eq!(raw_preview(&ds, &filter_episode(&ds, None)).rows.len(), 4);
    }

    #[test]
    fn slider_bounds() {
        assert_eq!(clamp_top_n(None), 20);
        assert_eq!(clamp_top_n(Some(500)), 50);
        assert_eq!(clamp_min_len(Some(1)), 2);
    }
}
