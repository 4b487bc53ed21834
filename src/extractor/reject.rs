/// True when converted Markdown carries nothing worth archiving: no letters
/// or digits, no image and no raw table.
pub fn is_blank(markdown: &str) -> bool {
    let text = markdown.trim();
    if text.is_empty() {
        return true;
    }

    if text.contains("![") || text.contains("<table") {
        return false;
    }

    !text.chars().any(char::is_alphanumeric)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_markdown() {
        assert!(is_blank(""));
        assert!(is_blank(" \n\n\t"));
        assert!(is_blank("* * *\n\n---\n|  |  |"));
    }

    #[test]
    fn test_text_is_not_blank() {
        assert!(!is_blank("幽助"));
        assert!(!is_blank("## 100%"));
    }

    #[test]
    fn test_images_and_tables_are_not_blank() {
        assert!(!is_blank("![](images/page57_frames.gif)"));
        assert!(!is_blank("<table>\n<tr><td></td></tr>\n</table>"));
    }
}
