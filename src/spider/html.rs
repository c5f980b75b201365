//! Just enough HTML querying for Tabelog pages: descendant selectors made of
//! `tag`, `.class` or `tag.class` steps, attribute reads and flattened text.

use std::sync::OnceLock;

use regex::Regex;

const VOID_ELEMENTS: [&str; 8] = ["img", "br", "hr", "input", "meta", "link", "source", "wbr"];

fn tag_regex() -> &'static Regex {
    static TAG: OnceLock<Regex> = OnceLock::new();
    TAG.get_or_init(|| {
        Regex::new(r"<(/?)([a-zA-Z][a-zA-Z0-9]*)\b([^>]*)>").expect("static tag regex")
    })
}

fn attr_regex() -> &'static Regex {
    static ATTR: OnceLock<Regex> = OnceLock::new();
    ATTR.get_or_init(|| {
        Regex::new(r#"([a-zA-Z_:][-a-zA-Z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#)
            .expect("static attribute regex")
    })
}

fn strip_regex() -> &'static Regex {
    static STRIP: OnceLock<Regex> = OnceLock::new();
    STRIP.get_or_init(|| Regex::new(r"(?s)<!--.*?-->|<[^>]*>").expect("static strip regex"))
}

#[derive(Clone, Debug, PartialEq)]
struct Step {
    tag: Option<String>,
    class: Option<String>,
}

impl Step {
    fn parse(raw: &str) -> Self {
        match raw.split_once('.') {
            Some((tag, class)) => Step {
                tag: (!tag.is_empty()).then(|| tag.to_ascii_lowercase()),
                class: Some(class.to_string()),
            },
            None => Step {
                tag: Some(raw.to_ascii_lowercase()),
                class: None,
            },
        }
    }
}

#[derive(Clone, Debug)]
pub struct Element<'a> {
    pub tag: String,
    attrs: &'a str,
    pub inner: &'a str,
}

impl<'a> Element<'a> {
    pub fn attr(&self, name: &str) -> Option<String> {
        attr_regex().captures_iter(self.attrs).find_map(|caps| {
            let key = caps.get(1)?.as_str();
            if !key.eq_ignore_ascii_case(name) {
                return None;
            }
            let value = caps.get(2).or_else(|| caps.get(3)).or_else(|| caps.get(4))?;
            Some(decode_entities(value.as_str()))
        })
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.attr("class")
            .map(|classes| classes.split_whitespace().any(|c| c == class))
            .unwrap_or(false)
    }

    /// Text content with tags removed and whitespace collapsed.
    pub fn text(&self) -> String {
        let stripped = strip_regex().replace_all(self.inner, " ");
        decode_entities(&stripped)
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn select(&self, selector: &str) -> Vec<Element<'a>> {
        select(self.inner, selector)
    }

    pub fn select_text(&self, selector: &str) -> String {
        select_text(self.inner, selector)
    }
}

/// Every element matching a space-separated descendant selector, in document order.
pub fn select<'a>(html: &'a str, selector: &str) -> Vec<Element<'a>> {
    let steps: Vec<Step> = selector.split_whitespace().map(Step::parse).collect();
    let Some((last, ancestors)) = steps.split_last() else {
        return Vec::new();
    };

    let mut scopes = vec![html];
    for step in ancestors {
        scopes = scopes
            .into_iter()
            .flat_map(|scope| find_elements(scope, step))
            .map(|element| element.inner)
            .collect();
    }
    scopes
        .into_iter()
        .flat_map(|scope| find_elements(scope, last))
        .collect()
}

/// Text of the first match, or an empty string.
pub fn select_text(html: &str, selector: &str) -> String {
    select(html, selector)
        .first()
        .map(Element::text)
        .unwrap_or_default()
}

fn find_elements<'a>(html: &'a str, step: &Step) -> Vec<Element<'a>> {
    let mut found = Vec::new();
    for caps in tag_regex().captures_iter(html) {
        let (Some(whole), Some(name), Some(attrs)) = (caps.get(0), caps.get(2), caps.get(3)) else {
            continue;
        };
        if caps.get(1).map_or(false, |slash| !slash.as_str().is_empty()) {
            continue;
        }
        let tag = name.as_str().to_ascii_lowercase();
        if step.tag.as_deref().map_or(false, |wanted| wanted != tag) {
            continue;
        }

        let open_end = whole.end();
        let self_closing = attrs.as_str().trim_end().ends_with('/');
        let inner = if self_closing || VOID_ELEMENTS.contains(&tag.as_str()) {
            ""
        } else {
            &html[open_end..closing_tag_start(html, open_end, &tag)]
        };

        let element = Element {
            tag,
            attrs: attrs.as_str(),
            inner,
        };
        if step
            .class
            .as_deref()
            .map_or(true, |class| element.has_class(class))
        {
            found.push(element);
        }
    }
    found
}

/// Start of the tag closing the element opened just before `from`, or the end of
/// the input when the markup never closes it.
fn closing_tag_start(html: &str, from: usize, tag: &str) -> usize {
    let mut depth = 1usize;
    for caps in tag_regex().captures_iter(&html[from..]) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(2)) else {
            continue;
        };
        if !name.as_str().eq_ignore_ascii_case(tag) {
            continue;
        }
        let closing = caps.get(1).map_or(false, |slash| !slash.as_str().is_empty());
        if closing {
            depth -= 1;
            if depth == 0 {
                return from + whole.start();
            }
        } else if !whole.as_str().ends_with("/>") {
            depth += 1;
        }
    }
    html.len()
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// "3.58" -> 3.58, "-" -> 0.0
pub fn parse_f64(text: &str) -> f64 {
    let numeric: String = text
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    numeric.parse().unwrap_or(0.0)
}

/// "1,234件" -> 1234
pub fn parse_i64(text: &str) -> i64 {
    let digits: String = text
        .trim()
        .chars()
        .filter(|c| *c != ',')
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <div id="container">
          <h2 class="display-name"> <span>Tonkatsu &amp; Co</span> </h2>
          <div class="rdheader-rating__score">
            <b class="c-rating__val rdheader-rating__score-val">3.58</b>
          </div>
          <div class="rdheader-rating__review-target"><em class="num">1,204</em>件</div>
          <div class="other"><b class="c-rating__val">9.99</b></div>
          <ul>
            <li class="rdheader-subinfo__item">
              <span class="rdheader-subinfo__item-title">ジャンル：</span>
              <div><a href="/x"><span class="linktree__parent-target-text">とんかつ</span></a>、
              <a href="/y"><span class="linktree__parent-target-text">洋食</span></a></div>
            </li>
          </ul>
          <img class='rstdtl-photo-list__img' src="https://img.example/1.jpg" />
          <img class="rstdtl-photo-list__img" src=https://img.example/2.jpg>
        </div>
    "#;

    #[test]
    fn selects_descendants_by_class() {
        assert_eq!(select_text(PAGE, ".rdheader-rating__score b.c-rating__val"), "3.58");
        assert_eq!(select(PAGE, "b.c-rating__val").len(), 2);
        assert_eq!(select_text(PAGE, "h2.display-name"), "Tonkatsu & Co");
        assert_eq!(select_text(PAGE, ".missing"), "");
    }

    #[test]
    fn reads_attributes_in_any_quoting() {
        let photos: Vec<String> = select(PAGE, ".rstdtl-photo-list__img")
            .iter()
            .filter_map(|img| img.attr("src"))
            .collect();
        assert_eq!(photos, vec!["https://img.example/1.jpg", "https://img.example/2.jpg"]);
    }

    #[test]
    fn nested_same_tag_elements_close_correctly() {
        let html = r#"<div class="outer"><div class="inner">a</div>b</div><div>c</div>"#;
        let outer = select(html, "div.outer");
        assert_eq!(outer.len(), 1);
        assert_eq!(outer[0].text(), "a b");
    }

    #[test]
    fn scoped_queries_on_elements() {
        let item = select(PAGE, ".rdheader-subinfo__item").remove(0);
        assert_eq!(item.select_text(".rdheader-subinfo__item-title"), "ジャンル：");
        let genres: Vec<String> = item
            .select(".linktree__parent-target-text")
            .iter()
            .map(Element::text)
            .collect();
        assert_eq!(genres, vec!["とんかつ", "洋食"]);
    }

    #[test]
    fn number_parsing() {
        assert_eq!(parse_f64("3.58"), 3.58);
        assert_eq!(parse_f64("-"), 0.0);
        assert_eq!(parse_i64("1,204件"), 1204);
        assert_eq!(parse_i64(""), 0);
    }
}
