// Dashboard: dataset loading, analytics, and the HTML/terminal front ends

pub mod analytics;
pub mod dataset;
pub mod report;
pub mod server;
pub mod templates;
pub mod view;

pub use dataset::Dataset;
pub use view::{build_view, DashboardQuery, DashboardView};
