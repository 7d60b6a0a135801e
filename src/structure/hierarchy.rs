use serde::Serialize;
use tracing::{debug, warn};

use super::blocks::TextBlock;
use super::headers::HeaderLevel;

pub const PREAMBLE_TITLE: &str = "Preamble";

pub type SectionId = usize;

#[derive(Debug, Clone, Serialize)]
pub struct Section {
    pub id: SectionId,
    pub title: String,
    pub level: HeaderLevel,
    pub start_page: u32,
    pub end_page: u32,
    pub content: String,
    pub parent: Option<SectionId>,
    pub children: Vec<SectionId>,
    pub font_size: f32,
    pub is_bold: bool,
    /// Created by the builder rather than by a header in the document.
    pub synthetic: bool,
}

/// Section forest stored as an arena; links are indices into `sections`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SectionTree {
    sections: Vec<Section>,
    roots: Vec<SectionId>,
    orphan_count: usize,
}

impl SectionTree {
    pub fn get(&self, id: SectionId) -> &Section {
        &self.sections[id]
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn roots(&self) -> &[SectionId] {
        &self.roots
    }

    pub fn orphan_count(&self) -> usize {
        self.orphan_count
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Titles from the owning root down to `id`.
    pub fn path(&self, id: SectionId) -> Vec<String> {
        let mut titles = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let section = &self.sections[current];
            titles.push(section.title.clone());
            cursor = section.parent;
        }
        titles.reverse();
        titles
    }

    pub fn depth(&self, id: SectionId) -> usize {
        let mut depth = 1;
        let mut cursor = self.sections[id].parent;
        while let Some(parent) = cursor {
            depth += 1;
            cursor = self.sections[parent].parent;
        }
        depth
    }

    /// Pre-order walk over every root in document order.
    pub fn depth_first(&self) -> Vec<SectionId> {
        let mut order = Vec::with_capacity(self.sections.len());
        let mut stack = self.roots.iter().rev().copied().collect::<Vec<SectionId>>();
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.sections[id].children.iter().rev().copied());
        }
        order
    }

    pub fn top_level_titles(&self) -> Vec<String> {
        self.roots
            .iter()
            .map(|id| &self.sections[*id])
            .filter(|section| section.level == HeaderLevel::Main && !section.synthetic)
            .map(|section| section.title.clone())
            .collect()
    }

    fn push(&mut self, mut section: Section) -> SectionId {
        let id = self.sections.len();
        section.id = id;
        self.sections.push(section);
        id
    }

    fn attach(&mut self, parent: SectionId, child: SectionId) {
        self.sections[child].parent = Some(parent);
        self.sections[parent].children.push(child);
    }
}

/// Builds the section forest from classified blocks using one open slot per
/// header level.
pub fn build_section_hierarchy(blocks: &[TextBlock]) -> SectionTree {
    let mut tree = SectionTree::default();
    let mut current: [Option<SectionId>; 3] = [None; 3];
    let mut pending: Vec<&TextBlock> = Vec::new();

    for block in blocks {
        let Some(level) = block.header_level else {
            pending.push(block);
            continue;
        };

        flush_pending(&mut tree, &current, &mut pending);

        let id = tree.push(Section {
            id: 0,
            title: block.text.trim().to_string(),
            level,
            start_page: block.page,
            end_page: block.page,
            content: String::new(),
            parent: None,
            children: Vec::new(),
            font_size: block.font_size,
            is_bold: block.is_bold,
            synthetic: false,
        });

        match level {
            HeaderLevel::Main => {
                tree.roots.push(id);
                current = [Some(id), None, None];
            }
            HeaderLevel::Sub => {
                match current[0] {
                    Some(parent) => tree.attach(parent, id),
                    None => adopt_orphan(&mut tree, id),
                }
                current[1] = Some(id);
                current[2] = None;
            }
            HeaderLevel::SubSub => {
                match current[1].or(current[0]) {
                    Some(parent) => tree.attach(parent, id),
                    None => adopt_orphan(&mut tree, id),
                }
                current[2] = Some(id);
            }
        }
    }

    flush_pending(&mut tree, &current, &mut pending);
    tree
}

fn adopt_orphan(tree: &mut SectionTree, id: SectionId) {
    let section = &tree.sections[id];
    warn!(
        title = %section.title,
        level = section.level.as_u8(),
        page = section.start_page,
        "sub-header has no open parent section; keeping it as a root"
    );
    tree.roots.push(id);
    tree.orphan_count += 1;
}

fn flush_pending(
    tree: &mut SectionTree,
    current: &[Option<SectionId>; 3],
    pending: &mut Vec<&TextBlock>,
) {
    if pending.is_empty() {
        return;
    }

    let target = match current[2].or(current[1]).or(current[0]) {
        Some(id) => id,
        None => {
            let first_page = pending.first().map(|block| block.page).unwrap_or(1);
            debug!(blocks = pending.len(), "collecting text before first header into preamble");
            let id = tree.push(Section {
                id: 0,
                title: PREAMBLE_TITLE.to_string(),
                level: HeaderLevel::Main,
                start_page: first_page,
                end_page: first_page,
                content: String::new(),
                parent: None,
                children: Vec::new(),
                font_size: 0.0,
                is_bold: false,
                synthetic: true,
            });
            tree.roots.push(id);
            id
        }
    };

    let body = pending
        .iter()
        .map(|block| block.text.as_str())
        .collect::<Vec<&str>>()
        .join("\n\n");
    let last_page = pending.iter().map(|block| block.page).max();

    let section = &mut tree.sections[target];
    if !section.content.is_empty() {
        section.content.push_str("\n\n");
    }
    section.content.push_str(&body);
    if let Some(page) = last_page {
        section.end_page = section.end_page.max(page);
    }

    pending.clear();
}
