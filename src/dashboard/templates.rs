use askama::Template;

use super::view::DashboardView;

#[derive(Template)]
#[template(path = "dashboard.html")]
pub struct DashboardTemplate<'a> {
    pub view: &'a DashboardView,
    /// Banner shown above the page, e.g. a rejected upload
    pub message: Option<String>,
    /// Static snapshots have no server to post the forms to
    pub interactive: bool,
}

#[derive(Template)]
#[template(path = "empty.html")]
pub struct EmptyTemplate {
    pub message: Option<String>,
}

pub fn render_dashboard(view: &DashboardView, message: Option<String>, interactive: bool) -> askama::Result<String> {
    DashboardTemplate { view, message, interactive }.render()
}

pub fn render_empty(message: Option<String>) -> askama::Result<String> {
    EmptyTemplate { message }.render()
}
