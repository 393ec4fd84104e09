use webchat::extractor::*;

#[cfg(test)]
mod extract_tests {
    use super::*;

    fn text_of(html: &str) -> String {
        extract(html.as_bytes()).unwrap().1
    }

    fn title_of(html: &str) -> String {
        extract(html.as_bytes()).unwrap().0
    }

    #[test]
    fn test_empty_document() {
        let (title, text) = extract(b"").unwrap();
        assert_eq!(title, "");
        assert_eq!(text, "");
    }

    #[test]
    fn test_plain_text_no_html() {
        assert_eq!(text_of("Hello World"), "Hello World");
    }

    #[test]
    fn test_nested_html() {
        assert_eq!(text_of("<div><p>Hello <span>World</span></p></div>"), "Hello World");
    }

    #[test]
    fn test_removes_script_and_style() {
        let text = text_of(
            "<p>Before</p><script>alert('evil')</script><style>body { color: red; }</style><p>After</p>",
        );
        assert!(!text.contains("alert"));
        assert!(!text.contains("color"));
        assert_eq!(text, "Before After");
    }

    #[test]
    fn test_removes_page_chrome() {
        let html = r#"<html><body>
            <header>Site header</header>
            <nav><a href="/">Home</a></nav>
            <main><p>Real content</p></main>
            <aside>Related links</aside>
            <footer>Copyright</footer>
            <noscript>Enable JS</noscript>
        </body></html>"#;
        assert_eq!(text_of(html), "Real content");
    }

    #[test]
    fn test_title_is_taken_from_head_only() {
        let html = "<html><head><title>  The   Title </title></head><body><p>Body</p></body></html>";
        assert_eq!(title_of(html), "The Title");
        assert_eq!(text_of(html), "Body");
    }

    #[test]
    fn test_only_first_title_counts() {
        let html = "<html><head><title>First</title></head><body><svg><title>Icon</title></svg><p>x</p></body></html>";
        assert_eq!(title_of(html), "First");
    }

    #[test]
    fn test_blank_title_is_skipped_for_next_one() {
        let html = "<html><head><title>   </title></head><body><svg><title>Chart</title></svg><p>x</p></body></html>";
        assert_eq!(title_of(html), "Chart");
    }

    #[test]
    fn test_title_text_stays_out_of_body() {
        let html = "<html><head><title>Heading</title></head><body><p>only body</p></body></html>";
        assert_eq!(text_of(html), "only body");
    }

    #[test]
    fn test_missing_title_is_empty() {
        assert_eq!(title_of("<p>no title here</p>"), "");
    }

    #[test]
    fn test_whitespace_collapsed_and_trimmed() {
        let html = "<p>\n\n   lots\t\tof \r\n  space   </p><p>here</p>";
        assert_eq!(text_of(html), "lots of space here");
    }

    #[test]
    fn test_entities_decoded() {
        assert_eq!(text_of("<p>fish &amp; chips</p>"), "fish & chips");
    }

    #[test]
    fn test_invalid_utf8_does_not_fail() {
        let raw = b"<p>caf\xe9 ok</p>";
        let (_, text) = extract(raw).unwrap();
        assert!(text.ends_with("ok"));
    }
}

#[cfg(test)]
mod word_limit_tests {
    use super::*;

    fn page_with_words(n: usize) -> String {
        let words: Vec<String> = (0..n).map(|i| format!("w{i}")).collect();
        format!("<html><body><p>{}</p></body></html>", words.join(" "))
    }

    #[test]
    fn test_long_page_is_cut_with_marker() {
        let (_, text) = extract(page_with_words(600).as_bytes()).unwrap();
        assert!(text.ends_with(&format!("w499{CONTINUATION_MARKER}")));
        let body = text.trim_end_matches(CONTINUATION_MARKER);
        assert_eq!(body.split_whitespace().count(), MAX_WORDS);
        assert!(!text.contains("w500"));
    }

    #[test]
    fn test_exactly_max_words_is_untouched() {
        let (_, text) = extract(page_with_words(MAX_WORDS).as_bytes()).unwrap();
        assert_eq!(text.split_whitespace().count(), MAX_WORDS);
        assert!(!text.ends_with(CONTINUATION_MARKER));
    }

    #[test]
    fn test_short_page_is_untouched() {
        let (_, text) = extract(page_with_words(400).as_bytes()).unwrap();
        assert_eq!(text.split_whitespace().count(), 400);
        assert!(!text.ends_with(CONTINUATION_MARKER));
    }
}
