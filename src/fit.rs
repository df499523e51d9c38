use crate::error::FieldMarkError;

/// Content rectangle inside a target box, offsets relative to the box origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AspectFit {
    pub width: f64,
    pub height: f64,
    pub offset_x: f64,
    pub offset_y: f64,
}

/// Uniformly scales `content` into `box`, centered on the axis with slack.
///
/// When the ratios tie the height branch is taken, which yields the same numbers as the width
/// branch up to rounding.
pub fn aspect_fit(
    box_width: f64,
    box_height: f64,
    content_width: f64,
    content_height: f64,
) -> Result<AspectFit, FieldMarkError> {
    check_dimension("box width", box_width)?;
    check_dimension("box height", box_height)?;
    check_dimension("content width", content_width)?;
    check_dimension("content height", content_height)?;

    let box_ratio = box_width / box_height;
    let content_ratio = content_width / content_height;

    if content_ratio > box_ratio {
        let height = box_width / content_ratio;
        Ok(AspectFit {
            width: box_width,
            height,
            offset_x: 0.0,
            offset_y: (box_height - height) / 2.0,
        })
    } else {
        let width = box_height * content_ratio;
        Ok(AspectFit {
            width,
            height: box_height,
            offset_x: (box_width - width) / 2.0,
            offset_y: 0.0,
        })
    }
}

fn check_dimension(name: &str, value: f64) -> Result<(), FieldMarkError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(FieldMarkError::InvalidConfiguration(format!(
            "aspect fit {name} must be positive, got {value}"
        )));
    }
    Ok(())
}
