//! One-page PDF packaging of a rendered chart.

use image::RgbImage;
use lopdf::{
    Document, Object, Stream,
    content::{Content, Operation},
    dictionary,
};

use crate::{application::engine::EngineError, domain::geometry::PaperSize};

const IMAGE_NAME: &str = "Im0";

/// Wrap `image` in a document whose single page measures `paper`, the image filling the page.
pub fn package(image: &RgbImage, paper: PaperSize) -> Result<Vec<u8>, EngineError> {
    let width = paper.width.max(1.0) as f32;
    let height = paper.height.max(1.0) as f32;

    let mut document = Document::with_version("1.5");
    let pages_id = document.new_object_id();

    let image_id = document.add_object(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => image.width() as i64,
            "Height" => image.height() as i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
        },
        image.as_raw().clone(),
    ));

    let content = Content {
        operations: vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    width.into(),
                    0.into(),
                    0.into(),
                    height.into(),
                    0.into(),
                    0.into(),
                ],
            ),
            Operation::new("Do", vec![Object::Name(IMAGE_NAME.as_bytes().to_vec())]),
            Operation::new("Q", vec![]),
        ],
    };
    let encoded = content
        .encode()
        .map_err(|err| EngineError::render(format!("could not encode the page content: {err}")))?;
    let content_id = document.add_object(Stream::new(dictionary! {}, encoded));

    let page_id = document.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0.into(), 0.into(), width.into(), height.into()],
        "Contents" => content_id,
        "Resources" => dictionary! {
            "XObject" => dictionary! { IMAGE_NAME => image_id },
        },
    });
    document.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );
    let catalog_id = document.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    document.trailer.set("Root", catalog_id);

    let mut buf = Vec::new();
    document
        .save_to(&mut buf)
        .map_err(|err| EngineError::render(format!("could not write the PDF: {err}")))?;
    Ok(buf)
}
