/// Identifies one append-only source buffer. Source 0 is the environment
/// buffer holding global and type names; each REPL input or script file
/// gets its own id.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct SrcId(pub u32);

/// A half-open byte range into a source buffer. Positions never shift:
/// text is only ever appended.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub struct Slice {
    pub begin: u32,
    pub end: u32,
}

impl Slice {
    pub fn len(&self) -> usize {
        (self.end - self.begin) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.begin == self.end
    }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct SrcRef {
    pub src: SrcId,
    pub slice: Slice,
}

impl SrcRef {
    pub const NONE: SrcRef = SrcRef {
        src: SrcId(u32::MAX),
        slice: Slice { begin: 0, end: 0 },
    };

    pub fn new(src: SrcId, begin: usize, end: usize) -> Self {
        Self {
            src,
            slice: Slice {
                begin: begin as u32,
                end: end as u32,
            },
        }
    }

    pub fn is_none(&self) -> bool {
        self.src == SrcId(u32::MAX)
    }
}

/// Appends `text` to the buffer and returns the slice it now occupies.
pub fn append_src(buffer: &mut String, text: &str) -> Slice {
    let begin = buffer.len() as u32;
    buffer.push_str(text);
    Slice {
        begin,
        end: buffer.len() as u32,
    }
}

/// Resolves a reference against the source array for this invocation.
pub fn src_text<'a>(srcs: &[&'a str], r: SrcRef) -> &'a str {
    let text = srcs[r.src.0 as usize];
    &text[r.slice.begin as usize..r.slice.end as usize]
}
