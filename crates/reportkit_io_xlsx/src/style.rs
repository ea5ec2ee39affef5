//! Style and lock resolution, plus conversion into `rust_xlsxwriter` formats.

use rust_xlsxwriter::{Format, FormatAlign, FormatBorder};

use crate::conf::C_COLOR_FILL_LOCKED;
use crate::spec::{
    EnumSectionKind, SpecCellStyle, SpecColumn, SpecFillStyle, SpecSection, SpecStyleSet,
};

////////////////////////////////////////////////////////////////////////////////
// #region StyleCascade

/// Resolve the concrete style of one cell class.
///
/// Unset sub-fields of `style_explicit` are back-filled from `style_default`.
/// The lock flag is always `if_locked`, whatever either input says. Locked
/// cells without an explicit fill get [`C_COLOR_FILL_LOCKED`].
pub fn resolve_style(
    style_explicit: Option<&SpecCellStyle>,
    style_default: &SpecCellStyle,
    if_locked: bool,
) -> SpecCellStyle {
    let mut style = match style_explicit {
        None => style_default.clone(),
        Some(style_explicit) => style_default.merge(style_explicit),
    };
    style.locked = Some(if_locked);

    let if_has_explicit_fill = style_explicit
        .and_then(|val| val.fill.as_ref())
        .is_some_and(|fill| fill.color.is_some());
    if if_locked && !if_has_explicit_fill {
        style.fill = Some(SpecFillStyle {
            color: Some(C_COLOR_FILL_LOCKED.to_string()),
        });
    }
    style
}

/// Effective lock of a column: column override, else section lock.
///
/// Hidden sections are always locked.
pub fn resolve_lock(section: &SpecSection, column: Option<&SpecColumn>) -> bool {
    if section.kind == EnumSectionKind::Hidden {
        return true;
    }
    column
        .and_then(|col| col.locked)
        .unwrap_or(section.locked)
}

/// Resolved styles of one section, computed once per render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecSectionStyles {
    /// Title cell style.
    pub title: SpecCellStyle,
    /// Header cell style per column.
    pub header_by_col: Vec<SpecCellStyle>,
    /// Data cell style per column.
    pub data_by_col: Vec<SpecCellStyle>,
    /// Hidden metadata row style.
    pub hidden: SpecCellStyle,
}

impl SpecSectionStyles {
    /// Cascade defaults, section templates and column overrides.
    pub fn resolve(
        section: &SpecSection,
        columns: &[SpecColumn],
        styles_default: &SpecStyleSet,
    ) -> Self {
        let header_by_col = columns
            .iter()
            .map(|col| {
                resolve_style(
                    section.header_style.as_ref(),
                    &styles_default.header,
                    resolve_lock(section, Some(col)),
                )
            })
            .collect();

        let data_by_col = columns
            .iter()
            .map(|col| {
                let style_explicit = match (&section.data_style, &col.style) {
                    (Some(style_section), Some(style_col)) => Some(style_section.merge(style_col)),
                    (style_section, style_col) => {
                        style_col.clone().or_else(|| style_section.clone())
                    }
                };
                resolve_style(
                    style_explicit.as_ref(),
                    &styles_default.data,
                    resolve_lock(section, Some(col)),
                )
            })
            .collect();

        Self {
            title: resolve_style(
                section.title_style.as_ref(),
                &styles_default.title,
                resolve_lock(section, None),
            ),
            header_by_col,
            data_by_col,
            hidden: resolve_style(None, &styles_default.hidden, true),
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region FormatConversion

/// Convert a resolved style into a `rust_xlsxwriter` format.
pub fn derive_rust_xlsx_format(style: &SpecCellStyle) -> Format {
    let mut format = Format::new();

    if let Some(font) = &style.font {
        if let Some(val) = &font.name {
            format = format.set_font_name(val.clone());
        }
        if let Some(val) = font.size {
            format = format.set_font_size(val as f64);
        }
        if font.bold.unwrap_or(false) {
            format = format.set_bold();
        }
        if font.italic.unwrap_or(false) {
            format = format.set_italic();
        }
        if let Some(val) = &font.color {
            format = format.set_font_color(val.as_str());
        }
    }

    if let Some(fill) = &style.fill
        && let Some(val) = &fill.color
    {
        format = format.set_background_color(val.as_str());
    }

    if let Some(alignment) = &style.alignment {
        if let Some(val) = &alignment.horizontal
            && let Some(align) = derive_format_align(val)
        {
            format = format.set_align(align);
        }
        if let Some(val) = &alignment.vertical
            && let Some(align) = derive_format_align(val)
        {
            format = format.set_align(align);
        }
        if alignment.wrap.unwrap_or(false) {
            format = format.set_text_wrap();
        }
    }

    if let Some(val) = style.border {
        format = format.set_border(derive_format_border(val));
    }
    if let Some(val) = &style.num_format {
        format = format.set_num_format(val.clone());
    }

    if style.is_locked() {
        format = format.set_locked();
    } else {
        format = format.set_unlocked();
    }

    format
}

fn derive_format_border(border: i64) -> FormatBorder {
    match border {
        0 => FormatBorder::None,
        1 => FormatBorder::Thin,
        2 => FormatBorder::Medium,
        3 => FormatBorder::Dashed,
        4 => FormatBorder::Dotted,
        5 => FormatBorder::Thick,
        6 => FormatBorder::Double,
        7 => FormatBorder::Hair,
        _ => FormatBorder::None,
    }
}

fn derive_format_align(align: &str) -> Option<FormatAlign> {
    let value = align.trim().to_ascii_lowercase();
    match value.as_str() {
        "general" => Some(FormatAlign::General),
        "left" => Some(FormatAlign::Left),
        "center" => Some(FormatAlign::Center),
        "right" => Some(FormatAlign::Right),
        "fill" => Some(FormatAlign::Fill),
        "justify" => Some(FormatAlign::Justify),
        "center_across" => Some(FormatAlign::CenterAcross),
        "top" => Some(FormatAlign::Top),
        "bottom" => Some(FormatAlign::Bottom),
        "vcenter" | "middle" | "vertical_center" => Some(FormatAlign::VerticalCenter),
        _ => None,
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conf::derive_default_style_set;
    use crate::spec::SpecFontStyle;

    fn style_bold_red() -> SpecCellStyle {
        SpecCellStyle {
            font: Some(SpecFontStyle {
                bold: Some(true),
                color: Some("#FF0000".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn absent_explicit_uses_default_with_forced_lock() {
        let style_default = SpecCellStyle {
            locked: Some(true),
            ..style_bold_red()
        };

        let style = resolve_style(None, &style_default, false);
        assert_eq!(style.font, style_default.font);
        assert_eq!(style.locked, Some(false));
        assert_eq!(style.fill, None);
    }

    #[test]
    fn explicit_sub_fields_back_fill_from_default() {
        let style_default = derive_default_style_set().header;
        let style_explicit = SpecCellStyle {
            font: Some(SpecFontStyle {
                color: Some("#00FF00".to_string()),
                ..Default::default()
            }),
            locked: Some(true),
            ..Default::default()
        };

        let style = resolve_style(Some(&style_explicit), &style_default, false);
        let font = style.font.expect("font");
        assert_eq!(font.color.as_deref(), Some("#00FF00"));
        assert_eq!(font.bold, Some(true));
        assert_eq!(style.fill, style_default.fill);
        assert_eq!(style.alignment, style_default.alignment);
        assert_eq!(style.locked, Some(false));
    }

    #[test]
    fn locked_without_explicit_fill_gets_neutral_fill() {
        let style_default = derive_default_style_set().header;
        let style = resolve_style(Some(&style_bold_red()), &style_default, true);
        assert_eq!(
            style.fill.and_then(|fill| fill.color).as_deref(),
            Some(C_COLOR_FILL_LOCKED)
        );

        let style_explicit_fill = SpecCellStyle {
            fill: Some(SpecFillStyle {
                color: Some("#123456".to_string()),
            }),
            ..Default::default()
        };
        let style = resolve_style(Some(&style_explicit_fill), &style_default, true);
        assert_eq!(
            style.fill.and_then(|fill| fill.color).as_deref(),
            Some("#123456")
        );
    }

    #[test]
    fn column_lock_overrides_section_lock() {
        let section = SpecSection {
            locked: true,
            columns: vec![
                SpecColumn {
                    locked: Some(false),
                    ..SpecColumn::new("Editable", "Editable")
                },
                SpecColumn::new("Inherited", "Inherited"),
            ],
            ..SpecSection::new("s", "S")
        };

        assert!(!resolve_lock(&section, section.column("Editable")));
        assert!(resolve_lock(&section, section.column("Inherited")));
        assert!(resolve_lock(&section, None));

        let l_styles =
            SpecSectionStyles::resolve(&section, &section.columns, &derive_default_style_set());
        assert!(!l_styles.data_by_col[0].is_locked());
        assert!(l_styles.data_by_col[1].is_locked());
        assert!(!l_styles.header_by_col[0].is_locked());
        assert!(l_styles.hidden.is_locked());
    }

    #[test]
    fn hidden_section_locks_every_column() {
        let section = SpecSection {
            kind: EnumSectionKind::Hidden,
            columns: vec![SpecColumn {
                locked: Some(false),
                ..SpecColumn::new("A", "A")
            }],
            ..SpecSection::new("s", "S")
        };
        assert!(resolve_lock(&section, section.column("A")));
    }
}
