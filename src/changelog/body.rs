//! Release notes tokenizer
//!
//! EKS AMI release notes group package tables per Kubernetes version inside
//! collapsible sections:
//!
//! ```html
//! <details><summary><b>Kubernetes 1.32</b></summary>
//! <table>
//!   <tr><th>Package</th><th>AL2023_x86_64_STANDARD</th><th>AL2023_x86_64_NVIDIA</th></tr>
//!   <tr><td>kmod-nvidia-latest-dkms</td><td>—</td><td>570.124.06-1.amzn2023</td></tr>
//! </table>
//! </details>
//! ```
//!
//! Older notes use headings instead of `<details>`; both layouts are read.

use regex::Regex;
use tracing::debug;

use crate::changelog::source::PublishedRelease;
use crate::changelog::types::{AmiType, RawReleaseRow};

const DRIVER_PACKAGE: &str = "kmod-nvidia-latest-dkms";
const KUBELET_PACKAGE: &str = "kubelet";

pub struct ReleaseBodyParser {
    details_pattern: Regex,
    summary_pattern: Regex,
    heading_pattern: Regex,
    kubernetes_pattern: Regex,
    table_pattern: Regex,
    row_pattern: Regex,
    cell_pattern: Regex,
    colspan_pattern: Regex,
    tag_pattern: Regex,
    release_tag_date_pattern: Regex,
}

/// A table cell with its logical width
struct Cell {
    text: String,
    span: usize,
}

impl ReleaseBodyParser {
    pub fn new() -> Self {
        Self {
            details_pattern: Regex::new(r"(?is)<details\b[^>]*>(.*?)</details>").unwrap(),
            summary_pattern: Regex::new(r"(?is)<summary\b[^>]*>(.*?)</summary>").unwrap(),
            heading_pattern: Regex::new(r"(?is)<h[1-6]\b[^>]*>(.*?)</h[1-6]>").unwrap(),
            kubernetes_pattern: Regex::new(r"(?i)Kubernetes\s+(\d+\.\d+)").unwrap(),
            table_pattern: Regex::new(r"(?is)<table\b[^>]*>(.*?)</table>").unwrap(),
            row_pattern: Regex::new(r"(?is)<tr\b[^>]*>(.*?)</tr>").unwrap(),
            cell_pattern: Regex::new(r"(?is)<(?:td|th)\b([^>]*)>(.*?)</(?:td|th)>").unwrap(),
            colspan_pattern: Regex::new(r#"(?i)colspan\s*=\s*["']?(\d+)"#).unwrap(),
            tag_pattern: Regex::new(r"<[^>]*>").unwrap(),
            release_tag_date_pattern: Regex::new(r"^v?(\d{4})(\d{2})(\d{2})$").unwrap(),
        }
    }

    /// Tokenize every published release, newest first as given.
    pub fn parse_releases(&self, releases: &[PublishedRelease]) -> Vec<RawReleaseRow> {
        releases
            .iter()
            .filter(|release| {
                if !release.is_published() {
                    debug!("Ignoring unpublished release {}", release.tag_name);
                }
                release.is_published()
            })
            .flat_map(|release| self.parse_release(release))
            .collect()
    }

    pub fn parse_release(&self, release: &PublishedRelease) -> Vec<RawReleaseRow> {
        let Some(body) = release.body.as_deref().filter(|b| !b.trim().is_empty()) else {
            debug!("Empty body for release {}", release.tag_name);
            return Vec::new();
        };
        let release_date = release
            .published_at
            .clone()
            .or_else(|| self.date_from_tag(&release.tag_name))
            .unwrap_or_default();

        self.parse_body(body, &release.tag_name, &release_date)
    }

    /// Extract one row per GPU AMI column of the driver package row.
    pub fn parse_body(&self, body: &str, release_tag: &str, release_date: &str) -> Vec<RawReleaseRow> {
        let mut rows = Vec::new();
        for (kubernetes_version, section) in self.sections(body) {
            for table in self.table_pattern.captures_iter(section) {
                rows.extend(self.parse_table(
                    &table[1],
                    release_tag,
                    &kubernetes_version,
                    release_date,
                ));
            }
        }
        debug!("Release {}: {} driver rows", release_tag, rows.len());
        rows
    }

    /// Kubernetes sections of the body, from `<details>` blocks or, failing
    /// that, from headings.
    fn sections<'b>(&self, body: &'b str) -> Vec<(String, &'b str)> {
        let sections: Vec<(String, &str)> = self
            .details_pattern
            .captures_iter(body)
            .filter_map(|details| {
                let content = details.get(1)?.as_str();
                let summary = self.summary_pattern.captures(content)?;
                let version = self.kubernetes_version(&summary[1])?;
                Some((version, content))
            })
            .collect();
        if !sections.is_empty() {
            return sections;
        }

        let headings: Vec<_> = self.heading_pattern.captures_iter(body).collect();
        headings
            .iter()
            .enumerate()
            .filter_map(|(i, heading)| {
                let version = self.kubernetes_version(&heading[1])?;
                let start = heading.get(0)?.end();
                let end = headings
                    .get(i + 1)
                    .and_then(|next| next.get(0))
                    .map_or(body.len(), |m| m.start());
                Some((version, &body[start..end]))
            })
            .collect()
    }

    fn kubernetes_version(&self, text: &str) -> Option<String> {
        let text = self.text_of(text);
        self.kubernetes_pattern
            .captures(&text)
            .map(|caps| caps[1].to_string())
    }

    fn parse_table(
        &self,
        table: &str,
        release_tag: &str,
        kubernetes_version: &str,
        release_date: &str,
    ) -> Vec<RawReleaseRow> {
        let mut table_rows = self.row_pattern.captures_iter(table);
        let Some(header) = table_rows.next() else {
            return Vec::new();
        };
        let gpu_columns: Vec<(usize, AmiType)> = self
            .cells(&header[1])
            .iter()
            .enumerate()
            .filter_map(|(idx, cell)| Some((idx, cell.text.parse::<AmiType>().ok()?)))
            .collect();
        if gpu_columns.is_empty() {
            return Vec::new();
        }

        let mut driver_cells: Option<Vec<Cell>> = None;
        let mut kubelet_cells: Option<Vec<Cell>> = None;
        for row in table_rows {
            let cells = self.cells(&row[1]);
            match cells.first().map(|c| c.text.as_str()) {
                Some(DRIVER_PACKAGE) => driver_cells = Some(cells),
                Some(KUBELET_PACKAGE) => kubelet_cells = Some(cells),
                _ => {}
            }
        }
        let Some(driver_cells) = driver_cells else {
            return Vec::new();
        };

        gpu_columns
            .into_iter()
            .filter_map(|(column, ami_type)| {
                let driver = cell_at(&driver_cells, column)?;
                let kubelet = kubelet_cells
                    .as_deref()
                    .and_then(|cells| cell_at(cells, column))
                    .map(str::to_string);
                Some(RawReleaseRow {
                    release_tag: release_tag.to_string(),
                    kubernetes_version: kubernetes_version.to_string(),
                    architecture: ami_type.architecture().as_str().to_string(),
                    ami_type: ami_type.as_str().to_string(),
                    driver_version: driver.to_string(),
                    release_date: release_date.to_string(),
                    kubelet_version: kubelet,
                })
            })
            .collect()
    }

    fn cells(&self, row: &str) -> Vec<Cell> {
        self.cell_pattern
            .captures_iter(row)
            .map(|caps| Cell {
                text: self.text_of(&caps[2]),
                span: self
                    .colspan_pattern
                    .captures(&caps[1])
                    .and_then(|c| c[1].parse().ok())
                    .filter(|&span| span > 0)
                    .unwrap_or(1),
            })
            .collect()
    }

    /// Strip markup and decode the entities that appear in release notes
    fn text_of(&self, html: &str) -> String {
        self.tag_pattern
            .replace_all(html, "")
            .replace("&mdash;", "—")
            .replace("&nbsp;", " ")
            .replace("&amp;", "&")
            .trim()
            .to_string()
    }

    /// "v20241121" -> "2024-11-21"
    fn date_from_tag(&self, tag: &str) -> Option<String> {
        let caps = self.release_tag_date_pattern.captures(tag.trim())?;
        Some(format!("{}-{}-{}", &caps[1], &caps[2], &caps[3]))
    }
}

impl Default for ReleaseBodyParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Value of the cell covering logical column `column`, if it holds one
fn cell_at(cells: &[Cell], column: usize) -> Option<&str> {
    let mut start = 0;
    for cell in cells {
        if (start..start + cell.span).contains(&column) {
            return match cell.text.as_str() {
                "" | "-" | "—" => None,
                text => Some(text),
            };
        }
        start += cell.span;
    }
    None
}
