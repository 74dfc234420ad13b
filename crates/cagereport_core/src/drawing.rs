//! Inline picture fragments for WordprocessingML parts.

/// English Metric Units per pixel at 96 DPI (914400 EMU per inch / 96).
pub const EMU_PER_PIXEL: u64 = 9525;

pub const NS_W: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";
pub const NS_WP: &str = "http://schemas.openxmlformats.org/drawingml/2006/wordprocessingDrawing";
pub const NS_A: &str = "http://schemas.openxmlformats.org/drawingml/2006/main";
pub const NS_PIC: &str = "http://schemas.openxmlformats.org/drawingml/2006/picture";
pub const NS_R: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    pub cx: u64,
    pub cy: u64,
}

impl Extent {
    /// 1:1 pixel sizing; callers resize images beforehand.
    pub fn from_pixels(width_px: u32, height_px: u32) -> Self {
        Self {
            cx: u64::from(width_px) * EMU_PER_PIXEL,
            cy: u64::from(height_px) * EMU_PER_PIXEL,
        }
    }
}

/// A self-contained `<w:r>` holding an inline drawing that references
/// `rel_id`. The fragment declares its own namespaces so it stays valid
/// wherever it is spliced.
pub fn build_drawing_run(rel_id: &str, drawing_id: u32, extent: Extent) -> String {
    let Extent { cx, cy } = extent;
    format!(
        concat!(
            r#"<w:r xmlns:w="{w}" xmlns:wp="{wp}" xmlns:a="{a}" xmlns:pic="{pic}" xmlns:r="{r}">"#,
            "<w:drawing>",
            r#"<wp:inline distT="0" distB="0" distL="0" distR="0">"#,
            r#"<wp:extent cx="{cx}" cy="{cy}"/>"#,
            r#"<wp:docPr id="{id}" name="Picture {id}"/>"#,
            r#"<wp:cNvGraphicFramePr><a:graphicFrameLocks noChangeAspect="1"/></wp:cNvGraphicFramePr>"#,
            "<a:graphic>",
            r#"<a:graphicData uri="{pic}">"#,
            "<pic:pic>",
            r#"<pic:nvPicPr><pic:cNvPr id="0" name="Picture {id}"/><pic:cNvPicPr/></pic:nvPicPr>"#,
            r#"<pic:blipFill><a:blip r:embed="{rel_id}"/><a:stretch><a:fillRect/></a:stretch></pic:blipFill>"#,
            "<pic:spPr>",
            r#"<a:xfrm><a:off x="0" y="0"/><a:ext cx="{cx}" cy="{cy}"/></a:xfrm>"#,
            r#"<a:prstGeom prst="rect"><a:avLst/></a:prstGeom>"#,
            "</pic:spPr>",
            "</pic:pic>",
            "</a:graphicData>",
            "</a:graphic>",
            "</wp:inline>",
            "</w:drawing>",
            "</w:r>"
        ),
        w = NS_W,
        wp = NS_WP,
        a = NS_A,
        pic = NS_PIC,
        r = NS_R,
        cx = cx,
        cy = cy,
        id = drawing_id,
        rel_id = rel_id,
    )
}
