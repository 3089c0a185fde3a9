use crate::src_map::{src_text, SrcRef};

/// An elaboration error anchored to a source range, with optional
/// free-form note lines shown after the underline.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ContextualError {
    pub src_ref: SrcRef,
    pub message: String,
    pub notes: Vec<String>,
}

impl ContextualError {
    pub fn new(src_ref: SrcRef, message: impl Into<String>) -> Self {
        Self {
            src_ref,
            message: message.into(),
            notes: Vec::new(),
        }
    }

    pub fn with_notes(src_ref: SrcRef, message: impl Into<String>, notes: Vec<String>) -> Self {
        Self {
            src_ref,
            message: message.into(),
            notes,
        }
    }
}

/// Renders accumulated errors against their sources. Each error produces
/// three lines:
///
/// ```text
/// LINE:COL error: message
///  | <source line>
///  | ^~~
/// ```
///
/// followed by its notes verbatim. Errors are ordered by source position.
pub fn contextualize(srcs: &[&str], mut errors: Vec<ContextualError>) -> Vec<String> {
    errors.sort_by_key(|e| e.src_ref);
    errors.dedup();

    let mut out = Vec::new();
    for error in errors {
        if error.src_ref.is_none() {
            out.push(format!("error: {}", error.message));
            out.extend(error.notes);
            continue;
        }

        let text = srcs[error.src_ref.src.0 as usize];
        let begin = error.src_ref.slice.begin as usize;
        let end = (error.src_ref.slice.end as usize).max(begin + 1).min(text.len().max(begin + 1));

        let line_begin = text[..begin.min(text.len())]
            .rfind('\n')
            .map(|i| i + 1)
            .unwrap_or(0);
        let line_end = text[line_begin..]
            .find('\n')
            .map(|i| line_begin + i)
            .unwrap_or(text.len());
        let line_number = text[..line_begin].matches('\n').count() + 1;
        let column = begin - line_begin;

        let underline_len = end.min(line_end).max(begin + 1) - begin;

        out.push(format!("{}:{} error: {}", line_number, column, error.message));
        out.push(format!(" | {}", &text[line_begin..line_end]));
        out.push(format!(
            " | {}^{}",
            " ".repeat(column),
            "~".repeat(underline_len.saturating_sub(1))
        ));
        out.extend(error.notes);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::src_map::SrcId;

    #[test]
    fn renders_line_column_and_underline() {
        let src = "let x: f32 = 1";
        let errors = vec![ContextualError::new(
            SrcRef::new(SrcId(0), 4, 5),
            "expected f32, given i32",
        )];
        assert_eq!(
            vec![
                "1:4 error: expected f32, given i32".to_string(),
                " | let x: f32 = 1".to_string(),
                " |     ^".to_string(),
            ],
            contextualize(&[src], errors)
        );
    }

    #[test]
    fn renders_multi_character_underline_and_notes() {
        let src = "&1";
        let errors = vec![ContextualError::with_notes(
            SrcRef::new(SrcId(0), 0, 2),
            "cannot return a borrowed value",
            vec!["note line".to_string()],
        )];
        assert_eq!(
            vec![
                "1:0 error: cannot return a borrowed value".to_string(),
                " | &1".to_string(),
                " | ^~".to_string(),
                "note line".to_string(),
            ],
            contextualize(&[src], errors)
        );
    }

    #[test]
    fn orders_errors_by_position() {
        let src = "a b";
        let errors = vec![
            ContextualError::new(SrcRef::new(SrcId(0), 2, 3), "second"),
            ContextualError::new(SrcRef::new(SrcId(0), 0, 1), "first"),
        ];
        let rendered = contextualize(&[src], errors);
        assert!(rendered[0].contains("first"));
        assert!(rendered[3].contains("second"));
    }

    #[test]
    fn second_line_of_source() {
        let src = "fn f() -> i32 = 1\nfn g() -> i32 =";
        let errors = vec![ContextualError::new(
            SrcRef::new(SrcId(0), 32, 33),
            "expected expression",
        )];
        let rendered = contextualize(&[src], errors);
        assert_eq!("2:14 error: expected expression", rendered[0]);
        assert_eq!(" | fn g() -> i32 =", rendered[1]);
    }
}
