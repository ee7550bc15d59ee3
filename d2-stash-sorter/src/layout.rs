//! Item layout engine.
//!
//! Two phases. The claim pass walks every item on every page and hands
//! it to the first script piece whose matcher accepts it, in script
//! order; each claimed bucket is then sorted by its piece's sort order.
//! The placement pass pours the buckets into fresh pages through a
//! [`Pager`], strictly left-to-right and top-to-bottom, forcing a new
//! row after each script row and a new page after each script page.
//!
//! Items no piece claims stay where they were: their surviving source
//! pages (minus the claimed items) are appended after the scripted
//! pages with their coordinates untouched.

use crate::diagnostics::Diagnostics;
use crate::items;
use crate::policy::ResolvedScript;
use crate::schema::{Record, SchemaError, Value};
use crate::stash;
use tracing::debug;

pub const PAGE_WIDTH: u8 = 10;
pub const PAGE_HEIGHT: u8 = 10;

/// Cursor-based bin packer over a growing list of pages.
///
/// The cursor `(current_x, current_y)` is the next placement origin;
/// `next_y` tracks the bottom of the tallest item on the current row,
/// which is where the next row starts.
#[derive(Debug)]
pub struct Pager {
    pages: Vec<Vec<Record>>,
    current_x: u8,
    current_y: u8,
    next_y: u8,
}

impl Default for Pager {
    fn default() -> Self {
        Self::new()
    }
}

impl Pager {
    pub fn new() -> Self {
        Self {
            pages: vec![Vec::new()],
            current_x: 0,
            current_y: 0,
            next_y: 0,
        }
    }

    /// Places one item of the given `(width, height)`, rewriting its
    /// position fields. Wraps to a new row when the item does not fit
    /// the current one, and to a new page when it does not fit the
    /// current page.
    pub fn place(&mut self, mut wrapper: Record, size: (u8, u8)) -> Result<(), SchemaError> {
        let (width, height) = size;
        if self.current_x + width > PAGE_WIDTH {
            self.new_row();
        }
        if self.current_y + height > PAGE_HEIGHT {
            self.start_page();
        }
        stash::set_item_position(&mut wrapper, self.current_x as u64, self.current_y as u64)?;
        self.current_x += width;
        self.next_y = self.next_y.max(self.current_y + height);
        self.pages
            .last_mut()
            .expect("pager always has a page")
            .push(wrapper);
        Ok(())
    }

    /// Moves the cursor below the tallest item of the current row.
    pub fn new_row(&mut self) {
        self.current_x = 0;
        self.current_y = self.next_y;
    }

    /// Starts a fresh page at a script-page boundary. A no-op when the
    /// current page is still empty, so sparse scripts do not emit
    /// zero-item pages.
    pub fn new_page(&mut self) {
        if !self
            .pages
            .last()
            .expect("pager always has a page")
            .is_empty()
        {
            self.pages.push(Vec::new());
        }
        self.current_x = 0;
        self.current_y = 0;
        self.next_y = 0;
    }

    fn start_page(&mut self) {
        self.pages.push(Vec::new());
        self.current_x = 0;
        self.current_y = 0;
        self.next_y = 0;
    }

    pub fn into_pages(mut self) -> Vec<Vec<Record>> {
        if self.pages.last().is_some_and(Vec::is_empty) {
            self.pages.pop();
        }
        self.pages
    }
}

/// Reorganizes the items of `pages` according to `script`, returning the
/// new page list: scripted pages first, then the surviving original
/// pages holding everything no piece claimed.
pub fn arrange(
    pages: &[Value],
    script: &ResolvedScript,
    diags: &mut Diagnostics,
) -> Result<Vec<Vec<Record>>, SchemaError> {
    let pieces: Vec<_> = script.flat_pieces().collect();
    let mut buckets: Vec<Vec<Record>> = (0..pieces.len()).map(|_| Vec::new()).collect();
    let mut leftover_pages: Vec<Vec<Record>> = Vec::new();

    for page in pages {
        let page = page.as_record("page")?;
        let items = match page.get("items") {
            Some(Value::List(items)) => items,
            _ => continue,
        };
        let mut remaining = Vec::new();
        for wrapper in items {
            let wrapper = wrapper.as_record("item")?.clone();
            match pieces.iter().position(|piece| piece.matches(&wrapper)) {
                Some(index) => buckets[index].push(wrapper),
                None => remaining.push(wrapper),
            }
        }
        if !remaining.is_empty() {
            leftover_pages.push(remaining);
        }
    }

    for (piece, bucket) in pieces.iter().zip(buckets.iter_mut()) {
        piece.sort.apply(bucket);
    }

    let mut pager = Pager::new();
    let mut bucket_index = 0;
    for page in &script.pages {
        for row in page {
            for _ in row {
                for wrapper in std::mem::take(&mut buckets[bucket_index]) {
                    let code = stash::item_type_code(&wrapper)?.to_string();
                    let size = items::info_or_placeholder(&code, diags).size_or_default();
                    pager.place(wrapper, size)?;
                }
                bucket_index += 1;
            }
            pager.new_row();
        }
        pager.new_page();
    }

    let mut result = pager.into_pages();
    debug!(
        scripted = result.len(),
        leftover = leftover_pages.len(),
        "layout complete"
    );
    result.extend(leftover_pages);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::LayoutScript;

    fn wrapper(code: &str, x: u64, y: u64) -> Record {
        let mut item = Record::new();
        item.insert("item_type".to_string(), Value::Str(code.to_string()));
        item.insert("position_x".to_string(), Value::Int(x));
        item.insert("position_y".to_string(), Value::Int(y));
        let mut wrapper = Record::new();
        wrapper.insert("item".to_string(), Value::Record(item));
        wrapper.insert("gems".to_string(), Value::List(vec![]));
        wrapper
    }

    fn page_of(wrappers: Vec<Record>) -> Value {
        let mut page = Record::new();
        page.insert("item_count".to_string(), Value::Int(wrappers.len() as u64));
        page.insert(
            "items".to_string(),
            Value::List(wrappers.into_iter().map(Value::Record).collect()),
        );
        Value::Record(page)
    }

    fn positions(page: &[Record]) -> Vec<(u64, u64)> {
        page.iter()
            .map(|w| stash::item_position(w).unwrap())
            .collect()
    }

    fn codes(page: &[Record]) -> Vec<String> {
        page.iter()
            .map(|w| stash::item_type_code(w).unwrap().trim_end().to_string())
            .collect()
    }

    /// Asserts every item fits the grid and no two overlap.
    fn assert_packed(pages: &[Vec<Record>], diags: &mut Diagnostics) {
        for (page_no, page) in pages.iter().enumerate() {
            let mut occupied = [[false; 10]; 10];
            for item in page {
                let (x, y) = stash::item_position(item).unwrap();
                let code = stash::item_type_code(item).unwrap().to_string();
                let (w, h) = items::info_or_placeholder(&code, diags).size_or_default();
                assert!(
                    x + w as u64 <= 10 && y + h as u64 <= 10,
                    "item {code} out of bounds at ({x},{y}) on page {page_no}"
                );
                for cx in x..x + w as u64 {
                    for cy in y..y + h as u64 {
                        assert!(
                            !occupied[cx as usize][cy as usize],
                            "overlap at ({cx},{cy}) on page {page_no}"
                        );
                        occupied[cx as usize][cy as usize] = true;
                    }
                }
            }
        }
    }

    #[test]
    fn cursor_walks_left_to_right() {
        let mut pager = Pager::new();
        pager.place(wrapper("a", 9, 9), (2, 4)).unwrap();
        pager.place(wrapper("b", 9, 9), (2, 4)).unwrap();
        pager.place(wrapper("c", 9, 9), (2, 3)).unwrap();
        pager.place(wrapper("d", 9, 9), (2, 3)).unwrap();
        pager.place(wrapper("e", 9, 9), (4, 4)).unwrap();

        let pages = pager.into_pages();
        assert_eq!(pages.len(), 1);
        assert_eq!(
            positions(&pages[0]),
            vec![(0, 0), (2, 0), (4, 0), (6, 0), (0, 4)],
            "fifth item wraps to the next row because next_y is 4"
        );
    }

    #[test]
    fn full_page_overflows_to_a_new_one() {
        let mut pager = Pager::new();
        for i in 0..11 {
            pager.place(wrapper(&format!("i{i}"), 0, 0), (2, 4)).unwrap();
        }
        let pages = pager.into_pages();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].len(), 10);
        assert_eq!(positions(&pages[1]), vec![(0, 0)]);
    }

    #[test]
    fn script_rows_and_pages_force_breaks() {
        let mut pager = Pager::new();
        pager.place(wrapper("a", 0, 0), (1, 1)).unwrap();
        pager.new_row();
        pager.place(wrapper("b", 0, 0), (1, 1)).unwrap();
        pager.new_page();
        pager.place(wrapper("c", 0, 0), (1, 1)).unwrap();

        let pages = pager.into_pages();
        assert_eq!(pages.len(), 2);
        assert_eq!(positions(&pages[0]), vec![(0, 0), (0, 1)]);
        assert_eq!(positions(&pages[1]), vec![(0, 0)]);
    }

    #[test]
    fn empty_script_pages_are_not_emitted() {
        let mut pager = Pager::new();
        pager.new_page();
        pager.new_page();
        pager.place(wrapper("a", 0, 0), (1, 1)).unwrap();
        let pages = pager.into_pages();
        assert_eq!(pages.len(), 1);
    }

    #[test]
    fn arrange_claims_sorts_and_leaves_the_rest() {
        let pages = vec![page_of(vec![
            wrapper("1002", 5, 5),
            wrapper("1001", 0, 0),
            wrapper("gsr ", 1, 1),
            wrapper("hp3 ", 9, 9),
        ])];
        let script = LayoutScript::from_yaml(
            r#"
pages:
  - rows:
      - [souls]
      - [gsr]
"#,
        )
        .unwrap()
        .resolve()
        .unwrap();

        let mut diags = Diagnostics::default();
        let result = arrange(&pages, &script, &mut diags).unwrap();
        assert_eq!(result.len(), 2, "one scripted page plus one leftover page");

        assert_eq!(codes(&result[0]), vec!["1001", "1002", "gsr"]);
        assert_eq!(
            positions(&result[0]),
            vec![(0, 0), (1, 0), (0, 1)],
            "souls sort by number, the gem starts the next script row"
        );

        assert_eq!(codes(&result[1]), vec!["hp3"]);
        assert_eq!(positions(&result[1]), vec![(9, 9)], "unclaimed items keep their spot");

        assert!(diags.is_clean());
        assert_packed(&result, &mut Diagnostics::default());
    }

    #[test]
    fn arrange_drops_emptied_pages() {
        let pages = vec![
            page_of(vec![wrapper("1001", 3, 3)]),
            page_of(vec![wrapper("hp3 ", 0, 0)]),
        ];
        let script = LayoutScript::from_yaml("pages:\n  - rows:\n      - [souls]\n")
            .unwrap()
            .resolve()
            .unwrap();

        let result = arrange(&pages, &script, &mut Diagnostics::default()).unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(codes(&result[0]), vec!["1001"]);
        assert_eq!(codes(&result[1]), vec!["hp3"], "emptied source page is gone");
    }

    #[test]
    fn unknown_types_use_default_dimensions() {
        let pages = vec![page_of(vec![wrapper("zzz ", 0, 0), wrapper("zzz ", 0, 0)])];
        let script = LayoutScript::from_yaml("pages:\n  - rows:\n      - [zzz]\n")
            .unwrap()
            .resolve()
            .unwrap();

        let mut diags = Diagnostics::default();
        let result = arrange(&pages, &script, &mut diags).unwrap();
        assert_eq!(
            positions(&result[0]),
            vec![(0, 0), (2, 0)],
            "placeholder items place as 2x4"
        );
        assert_eq!(diags.missing_item_types().collect::<Vec<_>>(), vec!["zzz"]);
    }

    #[test]
    fn heavy_mixed_layout_stays_in_bounds() {
        let mut items = Vec::new();
        for i in 0..30 {
            items.push(wrapper(&format!("10{:02}", i % 9 + 1), 0, 0));
        }
        for _ in 0..12 {
            items.push(wrapper("gsr ", 0, 0));
        }
        let pages = vec![page_of(items)];
        let script = LayoutScript::from_yaml(
            "pages:\n  - rows:\n      - [souls]\n      - [gsr]\n",
        )
        .unwrap()
        .resolve()
        .unwrap();

        let mut diags = Diagnostics::default();
        let result = arrange(&pages, &script, &mut diags).unwrap();
        assert_packed(&result, &mut Diagnostics::default());
        let total: usize = result.iter().map(Vec::len).sum();
        assert_eq!(total, 42, "every item is somewhere");
    }
}
