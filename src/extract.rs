use crate::dom::{NodeKind, Tree};

/// Flatten a subtree into plain text.
///
/// Text leaves contribute their payload in document order; script and comment
/// subtrees contribute nothing. Uses an explicit stack, so arbitrarily deep
/// trees are fine.
pub fn extract_text<T: Tree>(tree: &T, node: T::Node) -> String {
    let mut out = String::new();
    walk_text(tree, node, |chunk| {
        out.push_str(chunk);
        true
    });
    out
}

/// Like [`extract_text`], but gives up once the text exceeds `max_chars`
/// characters. Returns `None` in that case.
pub fn extract_text_bounded<T: Tree>(tree: &T, node: T::Node, max_chars: usize) -> Option<String> {
    let mut out = String::new();
    let mut chars = 0;
    let complete = walk_text(tree, node, |chunk| {
        chars += chunk.chars().count();
        if chars > max_chars {
            return false;
        }
        out.push_str(chunk);
        true
    });
    complete.then_some(out)
}

/// Visit text chunks in document order. Stops early (returning false) when
/// `visit` returns false.
fn walk_text<T, F>(tree: &T, node: T::Node, mut visit: F) -> bool
where
    T: Tree,
    F: FnMut(&str) -> bool,
{
    let mut stack = vec![node];
    while let Some(current) = stack.pop() {
        match tree.kind(current) {
            NodeKind::Script | NodeKind::Comment => {}
            NodeKind::Text => {
                if let Some(text) = tree.text(current) {
                    if !visit(text) {
                        return false;
                    }
                }
            }
            NodeKind::Element | NodeKind::Document => {
                stack.extend(tree.children(current).into_iter().rev());
            }
        }
    }
    true
}
