// crates/core/src/sanitize.rs
//! HTML cleanup, selector extraction, and Markdown conversion.
//!
//! Everything here is synchronous and returns owned strings: `scraper::Html`
//! is not `Send`, so DOM work must finish before callers hit an await point.

use scraper::{ElementRef, Html, Selector};

/// Probes for the main content container, most specific first. A probe is
/// accepted only when it matches exactly one element.
const CONTENT_PROBES: &[&str] = &[
    "article",
    "#article",
    ".article",
    "main",
    "#main",
    ".main",
    r#"[role="main"]"#,
    "#content",
    ".content",
    ".post",
];

/// Elements removed wholesale, with everything under them.
const REMOVE_TAGS: &[&str] = &[
    "header", "footer", "nav", "aside", "script", "style", "noscript", "iframe", "button", "form",
    "input", "textarea", "select",
];

const REMOVE_CLASSES: &[&str] = &[
    "sidebar",
    "nav",
    "menu",
    "header",
    "footer",
    "advertisement",
    "ads",
    "cookie-notice",
    "social-share",
    "related-posts",
    "comments",
    "popup",
    "modal",
    "overlay",
    "banner",
    "alert",
    "notification",
    "subscription",
    "newsletter",
    "share-buttons",
    "noprint",
];

const REMOVE_IDS: &[&str] = &["comments"];

const REMOVE_ROLES: &[&str] = &["navigation", "complementary"];

/// Attributes stripped from every surviving element.
const REMOVE_ATTRS: &[&str] = &["style", "target", "src"];

const VOID_TAGS: &[&str] = &["br", "hr", "img", "input", "meta", "link", "source", "wbr"];

/// Strip non-content elements and noisy attributes, keeping the main content
/// container when one can be identified. `pretty` indents the output for
/// prompts where the LLM benefits from visible structure.
pub fn clean_html(html: &str, pretty: bool) -> String {
    if html.trim().is_empty() {
        return String::new();
    }

    let document = Html::parse_document(html);
    let target = find_content_root(&document);

    let mut out = String::with_capacity(html.len() / 2);
    for child in target.children() {
        if let Some(element) = ElementRef::wrap(child) {
            serialize_clean(element, &mut out, pretty, 0);
        } else if let Some(text) = child.value().as_text() {
            push_escaped(&mut out, text);
        }
    }
    collapse_blank_lines(out.trim())
}

/// Convert an HTML document to Markdown. Cleans it first.
pub fn html_to_markdown(html: &str) -> String {
    let cleaned = clean_html(html, false);
    if cleaned.is_empty() {
        return String::new();
    }

    let fragment = Html::parse_fragment(&cleaned);
    let mut out = String::with_capacity(cleaned.len());
    for child in fragment.root_element().children() {
        markdown_node(child, &mut out, 0, false);
    }
    collapse_blank_lines(out.trim())
}

/// Collect `href` values for every element matched by any of `selectors`,
/// in document order. Invalid selectors are skipped with a warning.
pub fn extract_hrefs(html: &str, selectors: &[String]) -> Vec<String> {
    let document = Html::parse_document(html);
    let mut hrefs = Vec::new();
    for raw in selectors {
        let Ok(selector) = Selector::parse(raw) else {
            tracing::warn!(selector = %raw, "skipping unparseable CSS selector");
            continue;
        };
        for element in document.select(&selector) {
            if let Some(href) = element.value().attr("href") {
                hrefs.push(href.to_string());
            }
        }
    }
    hrefs
}

/// The `href` of the first element matched by `selector`, if any.
pub fn select_first_href(html: &str, selector: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .next()
        .and_then(|el| el.value().attr("href"))
        .map(|s| s.to_string())
}

fn find_content_root<'a>(document: &'a Html) -> ElementRef<'a> {
    for probe in CONTENT_PROBES {
        let Ok(selector) = Selector::parse(probe) else {
            continue;
        };
        let matches: Vec<ElementRef<'a>> = document.select(&selector).collect();
        if matches.len() == 1 {
            return matches[0];
        }
    }

    let body = Selector::parse("body").expect("valid body selector");
    document
        .select(&body)
        .next()
        .unwrap_or_else(|| document.root_element())
}

fn should_remove(element: ElementRef<'_>) -> bool {
    let value = element.value();
    let name = value.name();
    if REMOVE_TAGS.contains(&name) {
        return true;
    }
    if value.classes().any(|c| REMOVE_CLASSES.contains(&c)) {
        return true;
    }
    if let Some(id) = value.attr("id") {
        if REMOVE_IDS.contains(&id) {
            return true;
        }
    }
    if let Some(role) = value.attr("role") {
        if REMOVE_ROLES.contains(&role) {
            return true;
        }
    }
    false
}

fn keep_attribute(name: &str) -> bool {
    !(name.starts_with("on")
        || name.starts_with("aria-")
        || name.starts_with("data-")
        || name.starts_with("role")
        || REMOVE_ATTRS.contains(&name))
}

fn serialize_clean(element: ElementRef<'_>, out: &mut String, pretty: bool, depth: usize) {
    if should_remove(element) {
        return;
    }

    let value = element.value();
    let name = value.name();

    if pretty {
        out.push('\n');
        out.push_str(&"  ".repeat(depth));
    }
    out.push('<');
    out.push_str(name);
    for (attr_name, attr_value) in value.attrs() {
        if keep_attribute(attr_name) {
            out.push(' ');
            out.push_str(attr_name);
            out.push_str("=\"");
            out.push_str(&attr_value.replace('"', "&quot;"));
            out.push('"');
        }
    }

    if VOID_TAGS.contains(&name) {
        out.push_str("/>");
        return;
    }
    out.push('>');

    for child in element.children() {
        if let Some(child_element) = ElementRef::wrap(child) {
            serialize_clean(child_element, out, pretty, depth + 1);
        } else if let Some(text) = child.value().as_text() {
            push_escaped(out, text);
        }
    }

    out.push_str("</");
    out.push_str(name);
    out.push('>');
}

fn push_escaped(out: &mut String, text: &str) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            other => out.push(other),
        }
    }
}

fn markdown_node(
    node: ego_tree::NodeRef<'_, scraper::Node>,
    out: &mut String,
    depth: usize,
    pre: bool,
) {
    if let Some(text) = node.value().as_text() {
        if pre {
            out.push_str(text);
        } else {
            push_collapsed_text(out, text);
        }
        return;
    }

    let Some(element) = ElementRef::wrap(node) else {
        return;
    };
    let name = element.value().name();

    match name {
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
            let level = name[1..].parse::<usize>().unwrap_or(1);
            ensure_block(out);
            out.push_str(&"#".repeat(level));
            out.push(' ');
            markdown_children(element, out, depth, false);
            out.push_str("\n\n");
        }
        "p" | "div" | "section" | "figure" | "figcaption" => {
            ensure_block(out);
            markdown_children(element, out, depth, false);
            ensure_block(out);
        }
        "br" => out.push('\n'),
        "hr" => {
            ensure_block(out);
            out.push_str("***\n\n");
        }
        "strong" | "b" => {
            out.push_str("**");
            markdown_children(element, out, depth, false);
            out.push_str("**");
        }
        "em" | "i" => {
            out.push('*');
            markdown_children(element, out, depth, false);
            out.push('*');
        }
        "code" => {
            out.push('`');
            markdown_children(element, out, depth, true);
            out.push('`');
        }
        "pre" => {
            ensure_block(out);
            out.push_str("```\n");
            markdown_children(element, out, depth, true);
            if !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str("```\n\n");
        }
        "a" => {
            let mut label = String::new();
            markdown_children_into(element, &mut label, depth);
            let label = label.trim();
            match element.value().attr("href") {
                Some(href) if !label.is_empty() => {
                    out.push_str(&format!("[{label}]({href})"));
                }
                _ => out.push_str(label),
            }
        }
        "ul" | "ol" => {
            ensure_block(out);
            let ordered = name == "ol";
            let mut index = 1usize;
            for child in element.children() {
                if let Some(item) = ElementRef::wrap(child) {
                    if item.value().name() == "li" {
                        out.push_str(&"  ".repeat(depth));
                        if ordered {
                            out.push_str(&format!("{index}. "));
                            index += 1;
                        } else {
                            out.push_str("- ");
                        }
                        let mut body = String::new();
                        for li_child in item.children() {
                            markdown_node(li_child, &mut body, depth + 1, false);
                        }
                        out.push_str(body.trim());
                        out.push('\n');
                    }
                }
            }
            out.push('\n');
        }
        "blockquote" => {
            ensure_block(out);
            let mut body = String::new();
            markdown_children_into(element, &mut body, depth);
            for line in body.trim().lines() {
                out.push_str("> ");
                out.push_str(line);
                out.push('\n');
            }
            out.push('\n');
        }
        "table" => {
            ensure_block(out);
            let row_selector = Selector::parse("tr").expect("valid tr selector");
            let cell_selector = Selector::parse("th, td").expect("valid cell selector");
            let mut first = true;
            for row in element.select(&row_selector) {
                let cells: Vec<String> = row
                    .select(&cell_selector)
                    .map(|cell| {
                        let mut text = String::new();
                        markdown_children_into(cell, &mut text, depth);
                        text.trim().replace('\n', " ")
                    })
                    .collect();
                if cells.is_empty() {
                    continue;
                }
                out.push_str("| ");
                out.push_str(&cells.join(" | "));
                out.push_str(" |\n");
                if first {
                    out.push_str(&format!("|{}\n", " --- |".repeat(cells.len())));
                    first = false;
                }
            }
            out.push('\n');
        }
        "img" => {}
        _ => markdown_children(element, out, depth, pre),
    }
}

fn markdown_children(element: ElementRef<'_>, out: &mut String, depth: usize, pre: bool) {
    for child in element.children() {
        markdown_node(child, out, depth, pre);
    }
}

fn markdown_children_into(element: ElementRef<'_>, out: &mut String, depth: usize) {
    markdown_children(element, out, depth, false);
}

fn push_collapsed_text(out: &mut String, text: &str) {
    let has_leading = text.starts_with(char::is_whitespace);
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return;
    }
    if has_leading && !out.is_empty() && !out.ends_with(char::is_whitespace) {
        out.push(' ');
    }
    out.push_str(&collapsed);
    if text.ends_with(char::is_whitespace) {
        out.push(' ');
    }
}

fn ensure_block(out: &mut String) {
    while out.ends_with(' ') {
        out.pop();
    }
    if out.is_empty() {
        return;
    }
    if out.ends_with("\n\n") {
        return;
    }
    if out.ends_with('\n') {
        out.push('\n');
    } else {
        out.push_str("\n\n");
    }
}

fn collapse_blank_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0usize;
    for line in text.lines() {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
            out.push('\n');
        } else {
            blank_run = 0;
            out.push_str(line.trim_end());
            out.push('\n');
        }
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const PAGE: &str = r#"
        <html><body>
          <nav class="nav"><a href="/home">Home</a></nav>
          <article>
            <h1 onclick="evil()" data-track="1">Whiterun</h1>
            <p style="color:red">A city in <a href="/wiki/Skyrim" target="_blank">Skyrim</a>.</p>
            <script>alert(1)</script>
          </article>
          <footer>copyright</footer>
        </body></html>
    "#;

    #[test]
    fn clean_keeps_content_and_drops_chrome() {
        let cleaned = clean_html(PAGE, false);
        assert!(cleaned.contains("Whiterun"));
        assert!(cleaned.contains(r#"<a href="/wiki/Skyrim">"#));
        assert!(!cleaned.contains("nav"));
        assert!(!cleaned.contains("alert"));
        assert!(!cleaned.contains("copyright"));
        assert!(!cleaned.contains("onclick"));
        assert!(!cleaned.contains("data-track"));
        assert!(!cleaned.contains("style="));
        assert!(!cleaned.contains("target="));
    }

    #[test]
    fn clean_prefers_unique_article_container() {
        // The article is the content root, so the h1 is a top-level child.
        let cleaned = clean_html(PAGE, false);
        assert!(cleaned.starts_with("<h1>"));
    }

    #[test]
    fn markdown_renders_headings_links_and_lists() {
        let html = r#"
            <body><main>
              <h2>Factions</h2>
              <p>The <strong>Companions</strong> of <a href="/whiterun">Whiterun</a>.</p>
              <ul><li>Farkas</li><li>Vilkas</li></ul>
            </main></body>
        "#;
        let md = html_to_markdown(html);
        assert!(md.contains("## Factions"));
        assert!(md.contains("**Companions**"));
        assert!(md.contains("[Whiterun](/whiterun)"));
        assert!(md.contains("- Farkas"));
        assert!(md.contains("- Vilkas"));
    }

    #[test]
    fn markdown_tables_become_pipe_rows() {
        let html = r#"
            <body><table>
              <tr><th>Name</th><th>Hold</th></tr>
              <tr><td>Whiterun</td><td>Whiterun Hold</td></tr>
            </table></body>
        "#;
        let md = html_to_markdown(html);
        assert!(md.contains("| Name | Hold |"));
        assert!(md.contains("| --- | --- |"));
        assert!(md.contains("| Whiterun | Whiterun Hold |"));
    }

    #[test]
    fn extract_hrefs_walks_all_selectors_in_order() {
        let html = r#"
            <body>
              <div class="cards">
                <a class="card" href="/a">A</a>
                <a class="card" href="/b">B</a>
              </div>
              <a class="extra" href="/c">C</a>
            </body>
        "#;
        let hrefs = extract_hrefs(html, &[".cards a".into(), ".extra".into()]);
        assert_eq!(hrefs, vec!["/a", "/b", "/c"]);
    }

    #[test]
    fn invalid_selector_is_skipped_not_fatal() {
        let hrefs = extract_hrefs(r#"<a href="/x">x</a>"#, &["][".into(), "a".into()]);
        assert_eq!(hrefs, vec!["/x"]);
    }

    #[test]
    fn first_href_for_pagination() {
        let html = r#"<body><a class="next" href="/page/2">Next</a></body>"#;
        assert_eq!(
            select_first_href(html, ".next").as_deref(),
            Some("/page/2")
        );
        assert_eq!(select_first_href(html, ".prev"), None);
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert_eq!(clean_html("", false), "");
        assert_eq!(html_to_markdown("   "), "");
    }
}
