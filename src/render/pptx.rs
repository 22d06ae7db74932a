//! PresentationML (.pptx) writer.
//!
//! Every package carries one master, one blank layout and one theme; each
//! slide holds a title text box and a body text box positioned explicitly,
//! so no placeholders need to be inherited.

use anyhow::Result;

use super::model::{DeckModel, Slide};
use super::ooxml::{esc, relationship, relationships, Package, REL_OFFICE_DOCUMENT};

const NS_A: &str = "http://schemas.openxmlformats.org/drawingml/2006/main";
const NS_R: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const NS_P: &str = "http://schemas.openxmlformats.org/presentationml/2006/main";

const REL_SLIDE: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships/slide";
const REL_SLIDE_MASTER: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/slideMaster";
const REL_SLIDE_LAYOUT: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/slideLayout";
const REL_THEME: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships/theme";

const CT_PRESENTATION: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation.main+xml";
const CT_SLIDE: &str = "application/vnd.openxmlformats-officedocument.presentationml.slide+xml";
const CT_SLIDE_MASTER: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.slideMaster+xml";
const CT_SLIDE_LAYOUT: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.slideLayout+xml";
const CT_THEME: &str = "application/vnd.openxmlformats-officedocument.theme+xml";

/// 4:3 slide, in EMU.
const SLIDE_CX: u64 = 9_144_000;
const SLIDE_CY: u64 = 6_858_000;

const EMPTY_TREE: &str = r#"<p:spTree><p:nvGrpSpPr><p:cNvPr id="1" name=""/><p:cNvGrpSpPr/><p:nvPr/></p:nvGrpSpPr><p:grpSpPr><a:xfrm><a:off x="0" y="0"/><a:ext cx="0" cy="0"/><a:chOff x="0" y="0"/><a:chExt cx="0" cy="0"/></a:xfrm></p:grpSpPr></p:spTree>"#;

pub fn write(model: &DeckModel) -> Result<Vec<u8>> {
    let slides: Vec<Slide> = if model.slides.is_empty() {
        vec![Slide::default()]
    } else {
        model.slides.clone()
    };

    let mut pkg = Package::new();
    pkg.part("[Content_Types].xml", &content_types(slides.len()))?;
    pkg.part(
        "_rels/.rels",
        &relationships(&[relationship("rId1", REL_OFFICE_DOCUMENT, "ppt/presentation.xml")]),
    )?;
    pkg.part("ppt/presentation.xml", &presentation(slides.len()))?;
    pkg.part("ppt/_rels/presentation.xml.rels", &presentation_rels(slides.len()))?;
    pkg.part("ppt/slideMasters/slideMaster1.xml", &slide_master())?;
    pkg.part(
        "ppt/slideMasters/_rels/slideMaster1.xml.rels",
        &relationships(&[
            relationship("rId1", REL_SLIDE_LAYOUT, "../slideLayouts/slideLayout1.xml"),
            relationship("rId2", REL_THEME, "../theme/theme1.xml"),
        ]),
    )?;
    pkg.part("ppt/slideLayouts/slideLayout1.xml", &slide_layout())?;
    pkg.part(
        "ppt/slideLayouts/_rels/slideLayout1.xml.rels",
        &relationships(&[relationship(
            "rId1",
            REL_SLIDE_MASTER,
            "../slideMasters/slideMaster1.xml",
        )]),
    )?;
    pkg.part("ppt/theme/theme1.xml", &theme())?;

    for (i, slide) in slides.iter().enumerate() {
        let n = i + 1;
        pkg.part(&format!("ppt/slides/slide{n}.xml"), &slide_xml(slide))?;
        pkg.part(
            &format!("ppt/slides/_rels/slide{n}.xml.rels"),
            &relationships(&[relationship(
                "rId1",
                REL_SLIDE_LAYOUT,
                "../slideLayouts/slideLayout1.xml",
            )]),
        )?;
    }
    pkg.finish()
}

fn content_types(slide_count: usize) -> String {
    let mut overrides = vec![
        override_entry("/ppt/presentation.xml", CT_PRESENTATION),
        override_entry("/ppt/slideMasters/slideMaster1.xml", CT_SLIDE_MASTER),
        override_entry("/ppt/slideLayouts/slideLayout1.xml", CT_SLIDE_LAYOUT),
        override_entry("/ppt/theme/theme1.xml", CT_THEME),
    ];
    for n in 1..=slide_count {
        overrides.push(override_entry(&format!("/ppt/slides/slide{n}.xml"), CT_SLIDE));
    }
    format!(
        r#"<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/>{}</Types>"#,
        overrides.concat()
    )
}

fn override_entry(part: &str, content_type: &str) -> String {
    format!(r#"<Override PartName="{part}" ContentType="{content_type}"/>"#)
}

/// Relationship ids: rId1 master, rId2..=rId(n+1) slides, rId(n+2) theme.
fn presentation(slide_count: usize) -> String {
    let slide_ids: String = (0..slide_count)
        .map(|i| format!(r#"<p:sldId id="{}" r:id="rId{}"/>"#, 256 + i, i + 2))
        .collect();
    format!(
        r#"<p:presentation xmlns:a="{NS_A}" xmlns:r="{NS_R}" xmlns:p="{NS_P}"><p:sldMasterIdLst><p:sldMasterId id="2147483648" r:id="rId1"/></p:sldMasterIdLst><p:sldIdLst>{slide_ids}</p:sldIdLst><p:sldSz cx="{SLIDE_CX}" cy="{SLIDE_CY}" type="screen4x3"/><p:notesSz cx="{SLIDE_CY}" cy="{SLIDE_CX}"/></p:presentation>"#
    )
}

fn presentation_rels(slide_count: usize) -> String {
    let mut entries = vec![relationship(
        "rId1",
        REL_SLIDE_MASTER,
        "slideMasters/slideMaster1.xml",
    )];
    for i in 0..slide_count {
        entries.push(relationship(
            &format!("rId{}", i + 2),
            REL_SLIDE,
            &format!("slides/slide{}.xml", i + 1),
        ));
    }
    entries.push(relationship(
        &format!("rId{}", slide_count + 2),
        REL_THEME,
        "theme/theme1.xml",
    ));
    relationships(&entries)
}

fn slide_master() -> String {
    format!(
        r#"<p:sldMaster xmlns:a="{NS_A}" xmlns:r="{NS_R}" xmlns:p="{NS_P}"><p:cSld><p:bg><p:bgRef idx="1001"><a:schemeClr val="bg1"/></p:bgRef></p:bg>{EMPTY_TREE}</p:cSld><p:clrMap bg1="lt1" tx1="dk1" bg2="lt2" tx2="dk2" accent1="accent1" accent2="accent2" accent3="accent3" accent4="accent4" accent5="accent5" accent6="accent6" hlink="hlink" folHlink="folHlink"/><p:sldLayoutIdLst><p:sldLayoutId id="2147483649" r:id="rId1"/></p:sldLayoutIdLst></p:sldMaster>"#
    )
}

fn slide_layout() -> String {
    format!(
        r#"<p:sldLayout xmlns:a="{NS_A}" xmlns:r="{NS_R}" xmlns:p="{NS_P}" type="blank" preserve="1"><p:cSld name="Blank">{EMPTY_TREE}</p:cSld><p:clrMapOvr><a:masterClrMapping/></p:clrMapOvr></p:sldLayout>"#
    )
}

fn slide_xml(slide: &Slide) -> String {
    let margin = 457_200;
    let width = SLIDE_CX - 2 * margin;

    let title = text_box(
        2,
        "Title",
        (margin, margin),
        (width, 1_143_000),
        &[paragraph_xml(&slide.title, 3600, true, false)],
    );

    let mut body_paragraphs: Vec<String> = slide
        .text
        .iter()
        .map(|t| paragraph_xml(t, 2000, false, false))
        .collect();
    body_paragraphs.extend(slide.bullets.iter().map(|b| paragraph_xml(b, 2000, false, true)));
    if body_paragraphs.is_empty() {
        body_paragraphs.push("<a:p/>".to_string());
    }
    let body = text_box(
        3,
        "Body",
        (margin, margin + 1_371_600),
        (width, SLIDE_CY - 2 * margin - 1_371_600),
        &body_paragraphs,
    );

    format!(
        r#"<p:sld xmlns:a="{NS_A}" xmlns:r="{NS_R}" xmlns:p="{NS_P}"><p:cSld><p:spTree><p:nvGrpSpPr><p:cNvPr id="1" name=""/><p:cNvGrpSpPr/><p:nvPr/></p:nvGrpSpPr><p:grpSpPr><a:xfrm><a:off x="0" y="0"/><a:ext cx="0" cy="0"/><a:chOff x="0" y="0"/><a:chExt cx="0" cy="0"/></a:xfrm></p:grpSpPr>{title}{body}</p:spTree></p:cSld><p:clrMapOvr><a:masterClrMapping/></p:clrMapOvr></p:sld>"#
    )
}

fn text_box(id: u32, name: &str, off: (u64, u64), ext: (u64, u64), paragraphs: &[String]) -> String {
    format!(
        r#"<p:sp><p:nvSpPr><p:cNvPr id="{id}" name="{name}"/><p:cNvSpPr txBox="1"/><p:nvPr/></p:nvSpPr><p:spPr><a:xfrm><a:off x="{}" y="{}"/><a:ext cx="{}" cy="{}"/></a:xfrm><a:prstGeom prst="rect"><a:avLst/></a:prstGeom><a:noFill/></p:spPr><p:txBody><a:bodyPr wrap="square" rtlCol="0"><a:normAutofit/></a:bodyPr><a:lstStyle/>{}</p:txBody></p:sp>"#,
        off.0,
        off.1,
        ext.0,
        ext.1,
        paragraphs.concat()
    )
}

/// `size` is in hundredths of a point.
fn paragraph_xml(text: &str, size: u32, bold: bool, bullet: bool) -> String {
    let ppr = if bullet {
        r#"<a:pPr marL="342900" indent="-342900"><a:buFont typeface="Arial"/><a:buChar char="&#8226;"/></a:pPr>"#
    } else {
        ""
    };
    if text.is_empty() {
        return format!("<a:p>{ppr}<a:endParaRPr lang=\"en-US\" sz=\"{size}\"/></a:p>");
    }
    let b = if bold { r#" b="1""# } else { "" };
    format!(
        r#"<a:p>{ppr}<a:r><a:rPr lang="en-US" sz="{size}"{b} dirty="0"/><a:t>{}</a:t></a:r></a:p>"#,
        esc(&text.replace('\n', " "))
    )
}

fn theme() -> String {
    let colors = [
        ("dk1", r#"<a:sysClr val="windowText" lastClr="000000"/>"#),
        ("lt1", r#"<a:sysClr val="window" lastClr="FFFFFF"/>"#),
        ("dk2", r#"<a:srgbClr val="1F497D"/>"#),
        ("lt2", r#"<a:srgbClr val="EEECE1"/>"#),
        ("accent1", r#"<a:srgbClr val="4F81BD"/>"#),
        ("accent2", r#"<a:srgbClr val="C0504D"/>"#),
        ("accent3", r#"<a:srgbClr val="9BBB59"/>"#),
        ("accent4", r#"<a:srgbClr val="8064A2"/>"#),
        ("accent5", r#"<a:srgbClr val="4BACC6"/>"#),
        ("accent6", r#"<a:srgbClr val="F79646"/>"#),
        ("hlink", r#"<a:srgbClr val="0000FF"/>"#),
        ("folHlink", r#"<a:srgbClr val="800080"/>"#),
    ];
    let clr_scheme: String = colors
        .iter()
        .map(|(name, value)| format!("<a:{name}>{value}</a:{name}>"))
        .collect();
    let font = r#"<a:latin typeface="Calibri"/><a:ea typeface=""/><a:cs typeface=""/>"#;
    let solid = r#"<a:solidFill><a:schemeClr val="phClr"/></a:solidFill>"#;
    let line = |w: u32| {
        format!(
            r#"<a:ln w="{w}" cap="flat" cmpd="sng" algn="ctr"><a:solidFill><a:schemeClr val="phClr"/></a:solidFill><a:prstDash val="solid"/></a:ln>"#
        )
    };
    let effect = "<a:effectStyle><a:effectLst/></a:effectStyle>";
    format!(
        r#"<a:theme xmlns:a="{NS_A}" name="Office Theme"><a:themeElements><a:clrScheme name="Office">{clr_scheme}</a:clrScheme><a:fontScheme name="Office"><a:majorFont>{font}</a:majorFont><a:minorFont>{font}</a:minorFont></a:fontScheme><a:fmtScheme name="Office"><a:fillStyleLst>{solid}{solid}{solid}</a:fillStyleLst><a:lnStyleLst>{}{}{}</a:lnStyleLst><a:effectStyleLst>{effect}{effect}{effect}</a:effectStyleLst><a:bgFillStyleLst>{solid}{solid}{solid}</a:bgFillStyleLst></a:fmtScheme></a:themeElements><a:objectDefaults/><a:extraClrSchemeLst/></a:theme>"#,
        line(9525),
        line(25400),
        line(38100)
    )
}
