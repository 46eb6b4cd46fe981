use serde::{Deserialize, Serialize};

use super::analytics::{
    self, clamp_min_len, clamp_top_n, KeywordGroup, Overview, Table, ALL_EPISODES, ALL_SENTIMENTS,
    KEYWORD_LABELS, NO_KEYWORD,
};
use super::dataset::Dataset;

/// Dashboard controls, as query parameters
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DashboardQuery {
    pub episode: Option<String>,
    pub sentiment: Option<String>,
    pub q: Option<String>,
    pub keyword: Option<String>,
    /// Strings so that an empty form field is not a rejection
    pub top_n: Option<String>,
    pub min_len: Option<String>,
}

impl DashboardQuery {
    pub fn top_n(&self) -> usize {
        clamp_top_n(parse_number(self.top_n.as_deref()))
    }

    pub fn min_len(&self) -> usize {
        clamp_min_len(parse_number(self.min_len.as_deref()))
    }

    pub fn episode(&self) -> Option<&str> {
        self.episode.as_deref()
    }
}

fn parse_number(raw: Option<&str>) -> Option<usize> {
    raw.and_then(|s| s.trim().parse().ok())
}

#[derive(Debug, Clone, Serialize)]
pub struct SelectOption {
    pub value: String,
    pub selected: bool,
}

fn options(values: Vec<String>, current: &str) -> Vec<SelectOption> {
    values
        .into_iter()
        .map(|value| SelectOption { selected: value == current, value })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct Kpi {
    pub label: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Bar {
    pub sentiment: String,
    pub count: usize,
    pub percentage: String,
    /// CSS width relative to the largest bar
    pub width: String,
}

/// Everything the dashboard page shows
#[derive(Debug, Clone, Serialize)]
pub struct DashboardView {
    pub dataset_name: String,
    pub has_sentiment: bool,
    pub has_episodes: bool,
    pub episode_options: Vec<SelectOption>,
    pub selected_episode: String,
    pub kpis: Vec<Kpi>,
    pub bars: Vec<Bar>,
    pub top_n: usize,
    pub min_len: usize,
    pub keyword_groups: Vec<KeywordGroup>,
    pub keyword_options: Vec<SelectOption>,
    pub drilldown_count: usize,
    pub drilldown: Table,
    pub sentiment_options: Vec<SelectOption>,
    pub query: String,
    pub explore_count: usize,
    pub explore: Table,
    pub preview: Table,
}

pub fn build_view(dataset: &Dataset, query: &DashboardQuery) -> DashboardView {
    let selected_episode = query
        .episode()
        .filter(|e| dataset.has_episodes && !e.is_empty())
        .unwrap_or(ALL_EPISODES)
        .to_string();
    let rows = analytics::filter_episode(dataset, Some(&selected_episode));
    let top_n = query.top_n();
    let min_len = query.min_len();

    let overview = analytics::overview(&rows, dataset.has_sentiment());
    let kpis = vec![
        Kpi { label: "Total comments".to_string(), value: overview.total.to_string() },
        Kpi { label: "Positive %".to_string(), value: Overview::display(overview.positive_pct) },
        Kpi { label: "Neutral %".to_string(), value: Overview::display(overview.neutral_pct) },
        Kpi { label: "Negative %".to_string(), value: Overview::display(overview.negative_pct) },
    ];

    let distribution = analytics::sentiment_distribution(&rows);
    let max_count = distribution.iter().map(|d| d.count).max().unwrap_or(1).max(1);
    let bars = distribution
        .into_iter()
        .map(|d| Bar {
            width: format!("{:.1}%", d.count as f64 / max_count as f64 * 100.0),
            percentage: format!("{:.2}%", d.percentage),
            sentiment: d.sentiment,
            count: d.count,
        })
        .collect();

    let keyword = query.keyword.as_deref().map(str::trim).unwrap_or(NO_KEYWORD);
    let keyword = if keyword.is_empty() { NO_KEYWORD } else { keyword };
    let drilled = analytics::drilldown(&rows, Some(keyword));

    let sentiment = query
        .sentiment
        .as_deref()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| dataset.has_sentiment() && !s.is_empty())
        .unwrap_or_else(|| ALL_SENTIMENTS.to_string());
    let search = query.q.as_deref().map(str::trim).unwrap_or_default().to_string();
    let explored = analytics::explore(&rows, dataset.has_sentiment(), Some(&sentiment), Some(&search));

    let sentiment_values = std::iter::once(ALL_SENTIMENTS)
        .chain(KEYWORD_LABELS)
        .map(str::to_string)
        .collect();

    DashboardView {
        dataset_name: dataset.name.clone(),
        has_sentiment: dataset.has_sentiment(),
        has_episodes: dataset.has_episodes,
        episode_options: options(analytics::episode_options(dataset), &selected_episode),
        selected_episode,
        kpis,
        bars,
        top_n,
        min_len,
        keyword_groups: analytics::keyword_groups(&rows, dataset.has_sentiment(), top_n, min_len),
        keyword_options: options(analytics::drilldown_options(&rows, min_len), keyword),
        drilldown_count: drilled.len(),
        drilldown: analytics::comment_table(dataset, &drilled),
        sentiment_options: options(sentiment_values, &sentiment),
        query: search,
        explore_count: explored.len(),
        explore: analytics::comment_table(dataset, &explored),
        preview: analytics::raw_preview(dataset, &rows),
    }
}
