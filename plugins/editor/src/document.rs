//! The live editable document
//!
//! Holds the markup the user is editing together with a selection, and
//! implements the structural edits the media flows need: inserting,
//! replacing, resizing and deleting image references.

use crate::html::{self, StartTag, FILE_PATH_ATTRIBUTE, SOURCE_ATTRIBUTE};
use crate::EditorError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Current selection within the document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selection {
    /// Caret at a byte offset between tags
    Caret(usize),
    /// The n-th `<img>` element, counted from the start of the document
    Image(usize),
}

/// Width presets offered for inline images
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageSize {
    Small,
    Medium,
    Large,
    ExtraLarge,
}

impl ImageSize {
    pub const ALL: [ImageSize; 4] = [
        ImageSize::Small,
        ImageSize::Medium,
        ImageSize::Large,
        ImageSize::ExtraLarge,
    ];

    pub fn width_percent(&self) -> u8 {
        match self {
            ImageSize::Small => 25,
            ImageSize::Medium => 50,
            ImageSize::Large => 75,
            ImageSize::ExtraLarge => 100,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ImageSize::Small => "S",
            ImageSize::Medium => "M",
            ImageSize::Large => "L",
            ImageSize::ExtraLarge => "XL",
        }
    }

    /// Inline style applied to a resized image
    pub fn style(&self) -> String {
        let width = self.width_percent();
        format!("width: {}%; max-width: {}%;", width, width)
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl FromStr for ImageSize {
    type Err = EditorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ImageSize::ALL
            .into_iter()
            .find(|size| size.label().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| EditorError::InvalidImageSize(s.to_string()))
    }
}

/// Description of the selected image handed to the editing surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditingImage {
    /// Direct URL currently displayed
    pub url: String,
    /// Display name, the last segment of the path
    pub name: String,
    pub file_path: Option<String>,
}

impl EditingImage {
    fn from_tag(tag: &StartTag) -> Self {
        let file_path = tag.file_path().map(str::to_string);
        let name = file_path
            .as_deref()
            .and_then(|path| path.rsplit('/').next())
            .filter(|segment| !segment.is_empty())
            .unwrap_or("image")
            .to_string();

        Self {
            url: tag.value(SOURCE_ATTRIBUTE).unwrap_or_default().to_string(),
            name,
            file_path,
        }
    }
}

/// In-memory editable rich-text document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditableDocument {
    html: String,
    selection: Selection,
    revision: u64,
}

impl EditableDocument {
    /// Create a document with the caret at the end
    pub fn new(html: impl Into<String>) -> Self {
        let html = html.into();
        let end = html.len();
        Self {
            html,
            selection: Selection::Caret(end),
            revision: 0,
        }
    }

    pub fn html(&self) -> &str {
        &self.html
    }

    pub fn selection(&self) -> Selection {
        self.selection
    }

    /// Incremented by every content change
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn len(&self) -> usize {
        self.html.len()
    }

    pub fn is_empty(&self) -> bool {
        self.html.is_empty()
    }

    /// Replace the content programmatically
    ///
    /// The selection is kept when it is still valid, otherwise the caret
    /// moves to the end. Returns whether the content changed.
    pub fn set_content(&mut self, html: impl Into<String>) -> bool {
        let html = html.into();
        if html == self.html {
            return false;
        }
        let previous = std::mem::replace(&mut self.html, html);
        self.revision += 1;
        if let Selection::Caret(offset) = self.selection {
            if let Some(mapped) = html::map_offset(&previous, &self.html, offset) {
                self.selection = Selection::Caret(mapped);
            }
        }
        self.repair_selection();
        true
    }

    /// Replace the content with a user edit, leaving the caret at `caret`
    pub fn apply_edit(&mut self, html: impl Into<String>, caret: usize) -> Result<bool, EditorError> {
        let html = html.into();
        Self::validate_caret(&html, caret)?;
        let changed = html != self.html;
        if changed {
            self.html = html;
            self.revision += 1;
        }
        self.selection = Selection::Caret(caret);
        Ok(changed)
    }

    /// Move the caret to a byte offset outside any tag
    pub fn place_caret(&mut self, offset: usize) -> Result<(), EditorError> {
        Self::validate_caret(&self.html, offset)?;
        self.selection = Selection::Caret(offset);
        Ok(())
    }

    /// Select the n-th image of the document
    pub fn select_image(&mut self, index: usize) -> Result<(), EditorError> {
        let count = self.image_count();
        if index >= count {
            return Err(EditorError::ImageIndexOutOfRange { index, count });
        }
        self.selection = Selection::Image(index);
        Ok(())
    }

    pub fn image_count(&self) -> usize {
        html::image_tags(&self.html).len()
    }

    /// The selected image tag, if an image is selected
    pub fn selected_image(&self) -> Option<StartTag> {
        match self.selection {
            Selection::Image(index) => html::image_tags(&self.html).into_iter().nth(index),
            Selection::Caret(_) => None,
        }
    }

    /// Index of the first image referencing `file_path`
    pub fn find_image(&self, file_path: &str) -> Option<usize> {
        html::image_tags(&self.html)
            .iter()
            .position(|tag| tag.file_path() == Some(file_path))
    }

    fn require_selected_image(&self) -> Result<StartTag, EditorError> {
        self.selected_image().ok_or(EditorError::NoImageSelected)
    }

    /// Describe the selected image for the editing surface
    pub fn editing_image(&self) -> Result<EditingImage, EditorError> {
        self.require_selected_image()
            .map(|tag| EditingImage::from_tag(&tag))
    }

    /// Insert a file reference image at the selection
    ///
    /// With an image selected, the new image goes right after it. The caret
    /// ends up after the inserted element. Returns the insertion offset.
    pub fn insert_image(&mut self, src: &str, file_path: &str) -> Result<usize, EditorError> {
        let offset = match self.selection {
            Selection::Caret(offset) => {
                Self::validate_caret(&self.html, offset)?;
                offset
            }
            Selection::Image(_) => self.require_selected_image()?.span.end,
        };

        let element = html::image_element(src, file_path, None);
        self.html.insert_str(offset, &element);
        self.revision += 1;
        self.selection = Selection::Caret(offset + element.len());
        Ok(offset)
    }

    /// Point the selected image at a different file
    pub fn replace_selected_image(&mut self, src: &str, file_path: &str) -> Result<(), EditorError> {
        self.update_selected_image(&[(SOURCE_ATTRIBUTE, src), (FILE_PATH_ATTRIBUTE, file_path)])
    }

    /// Apply a width preset to the selected image
    pub fn resize_selected_image(&mut self, size: ImageSize) -> Result<(), EditorError> {
        let style = size.style();
        self.update_selected_image(&[("style", style.as_str())])
    }

    fn update_selected_image(&mut self, updates: &[(&str, &str)]) -> Result<(), EditorError> {
        let tag = self.require_selected_image()?;
        let rendered = html::set_attributes(&self.html, &tag, updates);
        self.html = html::splice(&self.html, tag.span, &rendered);
        self.revision += 1;
        Ok(())
    }

    /// Remove the selected image, leaving the caret where it was
    pub fn delete_selected_image(&mut self) -> Result<EditingImage, EditorError> {
        let tag = self.require_selected_image()?;
        let removed = EditingImage::from_tag(&tag);
        let offset = tag.span.start;

        self.html = html::splice(&self.html, tag.span, "");
        self.revision += 1;
        self.selection = Selection::Caret(offset);
        Ok(removed)
    }

    /// Target of the link around the caret
    pub fn link_at_caret(&self) -> Option<String> {
        let Selection::Caret(offset) = self.selection else {
            return None;
        };
        html::enclosing_element(&self.html, html::LINK_ELEMENT, offset)
            .and_then(|(tag, _)| tag.value("href").map(str::to_string))
    }

    /// Link the text in `range` to `href`
    ///
    /// A range starting inside an existing link retargets that link. A blank
    /// `href` removes the link around `range.start` instead.
    pub fn set_link(&mut self, range: Range<usize>, href: &str) -> Result<(), EditorError> {
        Self::validate_caret(&self.html, range.start)?;
        Self::validate_caret(&self.html, range.end)?;
        let invalid = EditorError::InvalidLinkRange {
            start: range.start,
            end: range.end,
        };
        if range.start > range.end {
            return Err(invalid);
        }

        let href = href.trim();
        if href.is_empty() {
            self.selection = Selection::Caret(range.start);
            self.unlink_at(range.start);
            return Ok(());
        }

        if let Some((tag, _)) = html::enclosing_element(&self.html, html::LINK_ELEMENT, range.start) {
            let rendered = html::set_attributes(&self.html, &tag, &[("href", href)]);
            self.html = html::splice(&self.html, tag.span.clone(), &rendered);
            self.revision += 1;
            self.selection = Selection::Caret(range.end - tag.span.len() + rendered.len());
            return Ok(());
        }

        if range.is_empty() || html::contains_markup(&self.html, range.clone()) {
            return Err(invalid);
        }
        let element = html::link_element(href, &self.html[range.clone()]);
        self.html = html::splice(&self.html, range.clone(), &element);
        self.revision += 1;
        self.selection = Selection::Caret(range.start + element.len());
        Ok(())
    }

    /// Unwrap the link around the caret, keeping its text
    ///
    /// Returns whether a link was removed.
    pub fn remove_link(&mut self) -> bool {
        match self.selection {
            Selection::Caret(offset) => self.unlink_at(offset),
            Selection::Image(_) => false,
        }
    }

    fn unlink_at(&mut self, offset: usize) -> bool {
        let Some((tag, end)) = html::enclosing_element(&self.html, html::LINK_ELEMENT, offset)
        else {
            return false;
        };
        let unlinked = html::splice(&self.html, end, "");
        self.html = html::splice(&unlinked, tag.span.clone(), "");
        self.revision += 1;
        self.selection = Selection::Caret(offset - tag.span.len());
        true
    }

    fn validate_caret(html: &str, offset: usize) -> Result<(), EditorError> {
        if offset > html.len() || !html.is_char_boundary(offset) || html::is_inside_markup(html, offset)
        {
            return Err(EditorError::InvalidCaret { offset });
        }
        Ok(())
    }

    fn repair_selection(&mut self) {
        let valid = match self.selection {
            Selection::Caret(offset) => Self::validate_caret(&self.html, offset).is_ok(),
            Selection::Image(index) => index < self.image_count(),
        };
        if !valid {
            self.selection = Selection::Caret(self.html.len());
        }
    }
}

impl Default for EditableDocument {
    fn default() -> Self {
        Self::new(String::new())
    }
}

/// A document shared between the session, its sync task and media flows
#[derive(Debug, Clone, Default)]
pub struct SharedDocument(Arc<Mutex<EditableDocument>>);

impl SharedDocument {
    pub fn new(document: EditableDocument) -> Self {
        Self(Arc::new(Mutex::new(document)))
    }

    /// Lock the document; never hold the guard across an await
    pub fn lock(&self) -> MutexGuard<'_, EditableDocument> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn html(&self) -> String {
        self.lock().html().to_string()
    }
}
