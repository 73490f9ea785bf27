//! Embeddable HTML wrapper for a published item.

/// Everything the wrapper page advertises.
#[derive(Debug, Clone)]
pub struct EmbedCard<'a> {
    pub title: &'a str,
    pub video_url: &'a str,
    pub image_url: Option<&'a str>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration_secs: f64,
}

/// Escape text for use inside an HTML attribute value.
pub fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn meta(out: &mut String, property: &str, content: &str) {
    out.push_str("    <meta property=\"");
    out.push_str(property);
    out.push_str("\" content=\"");
    out.push_str(&escape_attr(content));
    out.push_str("\" />\n");
}

/// Render the OpenGraph wrapper page.
pub fn render(card: &EmbedCard<'_>) -> String {
    let mut out = String::from("<!DOCTYPE html>\n<html>\n  <head>\n");
    out.push_str("    <meta charset=\"utf-8\" />\n");
    out.push_str("    <title>");
    out.push_str(&escape_attr(card.title));
    out.push_str("</title>\n");

    meta(&mut out, "og:title", card.title);
    meta(&mut out, "og:type", "video");
    if let Some(image) = card.image_url {
        meta(&mut out, "og:image", image);
    }
    meta(&mut out, "og:video", card.video_url);
    meta(&mut out, "og:video:type", "video/mp4");
    if let (Some(width), Some(height)) = (card.width, card.height) {
        meta(&mut out, "og:video:width", &width.to_string());
        meta(&mut out, "og:video:height", &height.to_string());
    }
    meta(
        &mut out,
        "video:duration",
        &(card.duration_secs.round() as u64).to_string(),
    );

    out.push_str("  </head>\n  <body>\n    <video controls src=\"");
    out.push_str(&escape_attr(card.video_url));
    out.push_str("\"></video>\n  </body>\n</html>\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card<'a>(title: &'a str, image: Option<&'a str>) -> EmbedCard<'a> {
        EmbedCard {
            title,
            video_url: "https://kara.example/3/video.mp4",
            image_url: image,
            width: Some(1280),
            height: Some(720),
            duration_secs: 212.6,
        }
    }

    #[test]
    fn test_render_carries_embed_metadata() {
        let html = render(&card("Song [+2]", Some("https://kara.example/3/thumb.jpg")));
        assert!(html.contains(r#"<meta property="og:title" content="Song [+2]" />"#));
        assert!(html.contains(r#"<meta property="og:type" content="video" />"#));
        assert!(
            html.contains(r#"<meta property="og:video" content="https://kara.example/3/video.mp4" />"#)
        );
        assert!(html.contains(r#"<meta property="og:video:type" content="video/mp4" />"#));
        assert!(html.contains(r#"<meta property="og:video:width" content="1280" />"#));
        assert!(html.contains(r#"<meta property="og:image" content="https://kara.example/3/thumb.jpg" />"#));
        assert!(html.contains(r#"<meta property="video:duration" content="213" />"#));
    }

    #[test]
    fn test_render_escapes_title_and_omits_missing_image() {
        let html = render(&card(r#"<script>"Tom & Jerry"</script>"#, None));
        assert!(html.contains("&lt;script&gt;&quot;Tom &amp; Jerry&quot;&lt;/script&gt;"));
        assert!(!html.contains("<script>"));
        assert!(!html.contains("og:image"));
    }
}
