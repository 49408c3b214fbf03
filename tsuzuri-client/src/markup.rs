//! Lightweight markup used in posts and comments.
//!
//! Spans never nest: `**a *b* c**` is bold text containing literal stars.
//! Anything that does not form a complete span is kept as plain text, so
//! parsing never fails.

use pest::{iterators::Pair, Parser};

#[derive(pest_derive::Parser)]
#[grammar = "markup.pest"]
struct MarkupParser;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Span {
    Text(String),
    LineBreak,
    Code(String),
    Bold(String),
    Italic(String),
    Underline(String),
    Highlight(String),
    Strike(String),
    Superscript(String),
    Muted(String),
    Tag(String),
    Link { text: String, url: String },
    Color { color: String, text: String },
    Image(String),
}

pub fn parse(input: &str) -> Vec<Span> {
    let document = match MarkupParser::parse(Rule::document, input) {
        Ok(mut pairs) => match pairs.next() {
            Some(d) => d,
            None => return vec![Span::Text(input.to_string())],
        },
        Err(err) => {
            tracing::warn!(%err, "markup rejected, rendering as plain text");
            return vec![Span::Text(input.to_string())];
        }
    };
    let mut res = Vec::new();
    for p in document.into_inner() {
        let span = match p.as_rule() {
            Rule::EOI => continue,
            Rule::text => {
                if let Some(Span::Text(t)) = res.last_mut() {
                    t.push_str(p.as_str());
                } else {
                    res.push(Span::Text(p.as_str().to_string()));
                }
                continue;
            }
            Rule::line_break => Span::LineBreak,
            Rule::code => Span::Code(body(p)),
            Rule::bold => Span::Bold(body(p)),
            Rule::italic => Span::Italic(body(p)),
            Rule::underline => Span::Underline(body(p)),
            Rule::highlight => Span::Highlight(body(p)),
            Rule::strike => Span::Strike(body(p)),
            Rule::superscript => Span::Superscript(body(p)),
            Rule::muted => Span::Muted(body(p)),
            Rule::tag => Span::Tag(body(p)),
            Rule::image => Span::Image(body(p)),
            Rule::link => {
                let mut inner = p.into_inner();
                let text = next_str(&mut inner);
                let url = next_str(&mut inner);
                Span::Link { text, url }
            }
            Rule::color => {
                let mut inner = p.into_inner();
                let color = next_str(&mut inner);
                let text = next_str(&mut inner);
                Span::Color { color, text }
            }
            r => unreachable!("markup rule {r:?} cannot appear at the top level"),
        };
        res.push(span);
    }
    res
}

fn body(p: Pair<Rule>) -> String {
    next_str(&mut p.into_inner())
}

fn next_str(pairs: &mut pest::iterators::Pairs<Rule>) -> String {
    pairs
        .next()
        .map(|p| p.as_str().to_string())
        .unwrap_or_default()
}

/// Text without any formatting, as used for excerpts and searches
pub fn to_plain(spans: &[Span]) -> String {
    let mut res = String::new();
    for s in spans {
        match s {
            Span::LineBreak => res.push('\n'),
            Span::Image(_) => (),
            Span::Link { text, .. } | Span::Color { text, .. } => res.push_str(text),
            Span::Text(t)
            | Span::Code(t)
            | Span::Bold(t)
            | Span::Italic(t)
            | Span::Underline(t)
            | Span::Highlight(t)
            | Span::Strike(t)
            | Span::Superscript(t)
            | Span::Muted(t)
            | Span::Tag(t) => res.push_str(t),
        }
    }
    res
}

/// Only these URLs get turned into links or images
pub fn is_safe_url(url: &str) -> bool {
    url.starts_with("https://")
        || url.starts_with("http://")
        || url.starts_with("mailto:")
        || (url.starts_with('/') && !url.starts_with("//"))
}

pub fn escape_html(s: &str) -> String {
    let mut res = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => res.push_str("&amp;"),
            '<' => res.push_str("&lt;"),
            '>' => res.push_str("&gt;"),
            '"' => res.push_str("&quot;"),
            '\'' => res.push_str("&#39;"),
            c => res.push(c),
        }
    }
    res
}

pub fn to_html(spans: &[Span]) -> String {
    let mut res = String::new();
    let wrap = |tag: &str, class: Option<&str>, t: &str, res: &mut String| {
        match class {
            Some(c) => res.push_str(&format!("<{tag} class=\"{c}\">")),
            None => res.push_str(&format!("<{tag}>")),
        }
        res.push_str(&escape_html(t));
        res.push_str(&format!("</{tag}>"));
    };
    for s in spans {
        match s {
            Span::Text(t) => res.push_str(&escape_html(t)),
            Span::LineBreak => res.push_str("<br>"),
            Span::Code(t) => {
                res.push_str("<pre><code>");
                res.push_str(&escape_html(t));
                res.push_str("</code></pre>");
            }
            Span::Bold(t) => wrap("strong", None, t, &mut res),
            Span::Italic(t) => wrap("em", None, t, &mut res),
            Span::Underline(t) => wrap("u", None, t, &mut res),
            Span::Highlight(t) => wrap("mark", None, t, &mut res),
            Span::Strike(t) => wrap("del", None, t, &mut res),
            Span::Superscript(t) => wrap("sup", None, t, &mut res),
            Span::Muted(t) => wrap("span", Some("muted"), t, &mut res),
            Span::Tag(t) => wrap("span", Some("tag"), t, &mut res),
            Span::Link { text, url } if is_safe_url(url) => res.push_str(&format!(
                "<a href=\"{}\" target=\"_blank\" rel=\"noopener noreferrer\">{}</a>",
                escape_html(url),
                escape_html(text)
            )),
            Span::Link { text, .. } => res.push_str(&escape_html(text)),
            // the grammar only lets hex codes through
            Span::Color { color, text } => res.push_str(&format!(
                "<span style=\"color: {color}\">{}</span>",
                escape_html(text)
            )),
            Span::Image(url) if is_safe_url(url) => res.push_str(&format!(
                "<img src=\"{}\" alt=\"embedded image\">",
                escape_html(url)
            )),
            Span::Image(_) => (),
        }
    }
    res
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Span {
        Span::Text(s.to_string())
    }

    #[test]
    fn plain_text() {
        assert_eq!(parse(""), vec![]);
        assert_eq!(parse("hello world"), vec![text("hello world")]);
        assert_eq!(parse("1 + 1 = 2"), vec![text("1 + 1 = 2")]);
    }

    #[test]
    fn simple_spans() {
        assert_eq!(
            parse("a **b** c"),
            vec![text("a "), Span::Bold("b".into()), text(" c")]
        );
        assert_eq!(parse("*i*"), vec![Span::Italic("i".into())]);
        assert_eq!(parse("_i_"), vec![Span::Italic("i".into())]);
        assert_eq!(parse("__u__"), vec![Span::Underline("u".into())]);
        assert_eq!(parse("==h=="), vec![Span::Highlight("h".into())]);
        assert_eq!(parse("~~s~~"), vec![Span::Strike("s".into())]);
        assert_eq!(parse("x^2^"), vec![text("x"), Span::Superscript("2".into())]);
        assert_eq!(parse("{{aside}}"), vec![Span::Muted("aside".into())]);
        assert_eq!(parse("@[rust]"), vec![Span::Tag("rust".into())]);
        assert_eq!(
            parse("```let x = 1;\nx```"),
            vec![Span::Code("let x = 1;\nx".into())]
        );
    }

    #[test]
    fn links_colors_images() {
        assert_eq!(
            parse("see [the docs](https://example.org/a_b)"),
            vec![
                text("see "),
                Span::Link {
                    text: "the docs".into(),
                    url: "https://example.org/a_b".into()
                }
            ]
        );
        assert_eq!(
            parse("{color:#f00}red{/color}"),
            vec![Span::Color {
                color: "#f00".into(),
                text: "red".into()
            }]
        );
        assert_eq!(
            parse("<image>/img/cat.png</image>"),
            vec![Span::Image("/img/cat.png".into())]
        );
    }

    #[test]
    fn line_breaks() {
        assert_eq!(parse("a\nb"), vec![text("a"), Span::LineBreak, text("b")]);
    }

    #[test]
    fn unterminated_markers_stay_text() {
        assert_eq!(parse("**not bold"), vec![text("**not bold")]);
        assert_eq!(parse("2 * 3 = 6"), vec![text("2 * 3 = 6")]);
        assert_eq!(parse("[dangling"), vec![text("[dangling")]);
        assert_eq!(parse("{color:red}x{/color}"), vec![text("{color:red}x{/color}")]);
    }

    #[test]
    fn spans_do_not_nest() {
        assert_eq!(parse("**a *b* c**"), vec![Span::Bold("a *b* c".into())]);
    }

    #[test]
    fn plain_rendering() {
        assert_eq!(
            to_plain(&parse("**Hi** [there](https://x.y)\n{{ok}}<image>/a.png</image>")),
            "Hi there\nok"
        );
    }

    #[test]
    fn html_is_escaped() {
        assert_eq!(
            to_html(&parse("<script>alert('x')</script>")),
            "&lt;script&gt;alert(&#39;x&#39;)&lt;/script&gt;"
        );
        assert_eq!(
            to_html(&parse("**<b>**")),
            "<strong>&lt;b&gt;</strong>"
        );
    }

    #[test]
    fn unsafe_urls_are_not_linked() {
        assert_eq!(to_html(&parse("[x](javascript:alert(1))")), "x)");
        assert_eq!(to_html(&parse("<image>javascript:1</image>")), "");
        assert_eq!(to_html(&parse("[x](//evil.org)")), "x");
        assert_eq!(
            to_html(&parse("[x](/posts)")),
            "<a href=\"/posts\" target=\"_blank\" rel=\"noopener noreferrer\">x</a>"
        );
    }

    #[test]
    fn fuzz_parse_is_total() {
        bolero::check!().with_type::<String>().for_each(|s| {
            let spans = parse(s);
            assert!(!to_html(&spans).contains("<script"));
            if !s.chars().any(|c| "`*_=~{<@[^\r\n".contains(c)) {
                let expected = if s.is_empty() { vec![] } else { vec![text(s)] };
                assert_eq!(spans, expected);
            }
        });
    }
}
