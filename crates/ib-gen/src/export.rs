//! Download naming for generated images.
//!
//! `{title}-{model}[-batch-N]-{timestamp}.png`, for example
//! `my-title-gemini-2.5-flash-batch-2-2024-01-15T10-30-00-000Z.png`.

use chrono::{DateTime, SecondsFormat, Utc};
use ib_core::{Board, EncodedImage, NodeId};

/// Lowercase, with runs of anything other than letters, digits, and dots
/// collapsed to a single `-`.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for ch in title.chars() {
        if ch.is_alphanumeric() || ch == '.' {
            slug.extend(ch.to_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "untitled".to_string()
    } else {
        slug.to_string()
    }
}

/// `models/gemini-2.5-flash-image-preview` → `gemini-2.5-flash`.
pub fn short_model_name(model: &str) -> &str {
    let mut name = model.strip_prefix("models/").unwrap_or(model);
    loop {
        if let Some(rest) = name.strip_suffix("-preview") {
            name = rest;
        } else if let Some(rest) = name.strip_suffix("-image") {
            name = rest;
        } else {
            return name;
        }
    }
}

pub fn download_file_name(
    title: &str,
    model: &str,
    batch: Option<usize>,
    at: DateTime<Utc>,
) -> String {
    let stamp = at
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-");
    let batch = batch.map(|n| format!("-batch-{n}")).unwrap_or_default();
    format!(
        "{}-{}{batch}-{stamp}.png",
        slugify(title),
        short_model_name(model)
    )
}

/// File name and bytes for a generator's currently selected result.
///
/// The batch suffix is only added when the last generation produced more
/// than one image.
pub fn export_selected(
    board: &Board,
    id: NodeId,
    at: DateTime<Utc>,
) -> Option<(String, EncodedImage)> {
    let data = board.get(id)?.as_generator()?;
    let image = data.generated_image()?.clone();
    let batch = (data.images.len() > 1).then_some(data.selected_index + 1);
    let name = download_file_name(&data.title, &data.config.model, batch, at);
    Some((name, image))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ib_core::Point;
    use pretty_assertions::assert_eq;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap()
    }

    #[test]
    fn file_name_with_batch() {
        assert_eq!(
            download_file_name("My Title", "gemini-2.5-flash-image", Some(2), at()),
            "my-title-gemini-2.5-flash-batch-2-2024-01-15T10-30-00-000Z.png"
        );
    }

    #[test]
    fn file_name_without_batch() {
        assert_eq!(
            download_file_name("Poster", "models/gemini-3-pro-image-preview", None, at()),
            "poster-gemini-3-pro-2024-01-15T10-30-00-000Z.png"
        );
    }

    #[test]
    fn slug_collapses_punctuation() {
        assert_eq!(slugify("  Hello,   World!! "), "hello-world");
        assert_eq!(slugify("猫 Cat"), "猫-cat");
        assert_eq!(slugify("***"), "untitled");
    }

    #[test]
    fn model_names_pass_through_when_nothing_to_strip() {
        assert_eq!(short_model_name("imagen-4"), "imagen-4");
    }

    #[test]
    fn export_uses_selected_result() {
        let mut board = Board::new();
        let generator = board.add_generator_node(Point::ZERO);
        board.set_title(generator, "Sky".into());
        let req = board.begin_generation(generator).unwrap();
        board.finish_generation(
            generator,
            req,
            Ok(vec![EncodedImage::png(vec![1]), EncodedImage::png(vec![2])]),
        );
        board.select_result(generator, 1);

        let (name, image) = export_selected(&board, generator, at()).unwrap();
        assert_eq!(name, "sky-gemini-2.5-flash-batch-2-2024-01-15T10-30-00-000Z.png");
        assert_eq!(image.bytes, vec![2]);
    }

    #[test]
    fn nothing_to_export_before_generation() {
        let mut board = Board::new();
        let generator = board.add_generator_node(Point::ZERO);
        assert!(export_selected(&board, generator, at()).is_none());
    }
}
