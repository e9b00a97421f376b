//! Reader for OpenCV's XML cascade format (`haarcascade_*.xml`).
//!
//! Handles the `opencv-cascade-classifier` layout written by OpenCV 2.4 and
//! later: `<width>`, `<height>`, `<stages>` of boosted stumps and a
//! `<features>` table of up-right rectangles. Tilted features and deeper
//! trees are rejected.

use crate::cascade::{CascadeError, HaarCascade, HaarFeature, Stage, Stump, WeightedRect};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::str::FromStr;

/// Element name OpenCV uses for sequence items.
const ITEM: &str = "_";

#[derive(Debug, Default)]
struct Element {
    name: String,
    text: String,
    children: Vec<Element>,
}

impl Element {
    fn new(name: &[u8]) -> Self {
        Self {
            name: String::from_utf8_lossy(name).into_owned(),
            ..Self::default()
        }
    }

    fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    fn required(&self, name: &str) -> Result<&Element, CascadeError> {
        self.child(name)
            .ok_or_else(|| invalid(format!("<{}> has no <{name}> element", self.name)))
    }

    fn items(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter(|c| c.name == ITEM)
    }

    fn tokens(&self) -> std::str::SplitWhitespace<'_> {
        self.text.split_whitespace()
    }

    fn value<T: FromStr>(&self) -> Result<T, CascadeError> {
        let text = self.text.trim();
        text.parse()
            .map_err(|_| invalid(format!("<{}> holds {text:?}", self.name)))
    }
}

fn invalid(msg: impl Into<String>) -> CascadeError {
    CascadeError::Invalid(msg.into())
}

fn token<T: FromStr>(raw: Option<&str>, what: &str) -> Result<T, CascadeError> {
    let raw = raw.ok_or_else(|| invalid(format!("missing {what}")))?;
    raw.parse()
        .map_err(|_| invalid(format!("bad {what} {raw:?}")))
}

/// Build the element tree, keeping text and dropping comments and attributes.
fn parse_document(text: &str) -> Result<Element, CascadeError> {
    let mut reader = Reader::from_str(text);
    let mut stack: Vec<Element> = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => stack.push(Element::new(e.name().as_ref())),
            Event::Empty(e) => {
                let element = Element::new(e.name().as_ref());
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => return Ok(element),
                }
            }
            Event::Text(e) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&e));
                    top.text.push(' ');
                }
            }
            Event::End(_) => {
                let done = stack
                    .pop()
                    .ok_or_else(|| invalid("unbalanced closing tag"))?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(done),
                    None => return Ok(done),
                }
            }
            Event::Eof => return Err(invalid("document ended before the root element closed")),
            _ => {}
        }
    }
}

/// Parse an OpenCV cascade document into a [`HaarCascade`]. Not validated.
pub(crate) fn parse_cascade(text: &str) -> Result<HaarCascade, CascadeError> {
    let root = parse_document(text)?;
    let cascade = if root.child("stages").is_some() {
        &root
    } else {
        root.children
            .iter()
            .find(|c| c.child("stages").is_some())
            .ok_or_else(|| {
                invalid("no <stages> element; only the OpenCV 2.4+ cascade layout is supported")
            })?
    };

    if let Some(kind) = cascade.child("featureType") {
        if kind.text.trim() != "HAAR" {
            return Err(invalid(format!("feature type {:?} is not HAAR", kind.text.trim())));
        }
    }
    if let Some(kind) = cascade.child("stageType") {
        if kind.text.trim() != "BOOST" {
            return Err(invalid(format!("stage type {:?} is not BOOST", kind.text.trim())));
        }
    }

    let window_width = cascade.required("width")?.value()?;
    let window_height = cascade.required("height")?.value()?;

    let features = cascade
        .required("features")?
        .items()
        .enumerate()
        .map(|(i, f)| parse_feature(i, f))
        .collect::<Result<Vec<_>, _>>()?;

    let stages = cascade
        .required("stages")?
        .items()
        .enumerate()
        .map(|(i, s)| parse_stage(i, s))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(HaarCascade {
        window_width,
        window_height,
        features,
        stages,
    })
}

fn parse_feature(index: usize, feature: &Element) -> Result<HaarFeature, CascadeError> {
    if let Some(tilted) = feature.child("tilted") {
        if tilted.text.trim() != "0" {
            return Err(invalid(format!("feature {index} is tilted; only up-right features are supported")));
        }
    }

    let rects = feature
        .required("rects")?
        .items()
        .map(|r| {
            let mut t = r.tokens();
            let rect = WeightedRect {
                x: token(t.next(), "rect x")?,
                y: token(t.next(), "rect y")?,
                width: token(t.next(), "rect width")?,
                height: token(t.next(), "rect height")?,
                weight: token(t.next(), "rect weight")?,
            };
            if t.next().is_some() {
                return Err(invalid(format!("feature {index} rect has extra values")));
            }
            Ok(rect)
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(HaarFeature { rects })
}

fn parse_stage(index: usize, stage: &Element) -> Result<Stage, CascadeError> {
    let threshold = stage.required("stageThreshold")?.value()?;

    let classifiers = stage
        .required("weakClassifiers")?
        .items()
        .map(|weak| {
            // Stump nodes read "left right feature threshold" with leaves 0 and -1.
            let nodes: Vec<&str> = weak.required("internalNodes")?.tokens().collect();
            let leaves: Vec<&str> = weak.required("leafValues")?.tokens().collect();
            if nodes.len() != 4 || leaves.len() != 2 {
                return Err(invalid(format!(
                    "stage {index} has a {}-node tree; only single-split stumps are supported",
                    nodes.len() / 4
                )));
            }
            Ok(Stump {
                feature: token(Some(nodes[2]), "feature index")?,
                threshold: token(Some(nodes[3]), "node threshold")?,
                left: token(Some(leaves[0]), "left leaf")?,
                right: token(Some(leaves[1]), "right leaf")?,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Stage {
        threshold,
        classifiers,
    })
}
