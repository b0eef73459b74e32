use rustc_hash::FxHashMap;

use crate::alphabet::{Alphabet, Label};

/// `PathTrie` 内のノード ID。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// ビームサーチで展開された経路の 1 ノード。
/// label が None のものがルート。
#[derive(Debug, Clone)]
pub struct PrefixNode {
    pub label: Option<Label>,
    pub parent: Option<NodeId>,
}

/// UTF-8 の先頭バイト (継続バイト 10xxxxxx 以外) かどうか。
pub(crate) fn byte_is_codepoint_boundary(byte: u8) -> bool {
    (byte & 0xC0) != 0x80
}

/**
 * ビームサーチの経路を保持するアリーナ。
 *
 * ノードは親への参照だけを持ち、後ろ向きにたどって直前の単語やコードポイントを取り出す。
 * スコアラはこのアリーナを読むだけで、ノードの生成・破棄は外側のビームサーチが行う。
 */
#[derive(Debug, Clone)]
pub struct PathTrie {
    nodes: Vec<PrefixNode>,
    children: FxHashMap<(NodeId, Label), NodeId>,
}

impl Default for PathTrie {
    fn default() -> Self {
        Self::new()
    }
}

impl PathTrie {
    pub fn new() -> PathTrie {
        PathTrie {
            nodes: vec![PrefixNode {
                label: None,
                parent: None,
            }],
            children: FxHashMap::default(),
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// `parent` の下に `label` を展開する。同じ (親, ラベル) は同じノードを返す。
    pub fn append(&mut self, parent: NodeId, label: Label) -> NodeId {
        if let Some(child) = self.children.get(&(parent, label)) {
            return *child;
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(PrefixNode {
            label: Some(label),
            parent: Some(parent),
        });
        self.children.insert((parent, label), id);
        id
    }

    /// ルートからラベル列を順に展開し、末端のノードを返す。
    pub fn extend(&mut self, from: NodeId, labels: &[Label]) -> NodeId {
        labels
            .iter()
            .fold(from, |node, label| self.append(node, *label))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        // ルートは常に存在する
        false
    }

    pub fn node(&self, id: NodeId) -> &PrefixNode {
        &self.nodes[id.0]
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn label(&self, id: NodeId) -> Option<Label> {
        self.nodes[id.0].label
    }

    pub fn is_root(&self, id: NodeId) -> bool {
        self.nodes[id.0].label.is_none()
    }

    /// ルートから id までのラベル列。
    pub fn labels(&self, id: NodeId) -> Vec<Label> {
        let mut labels = Vec::new();
        let mut current = Some(id);
        while let Some(node_id) = current {
            let node = self.node(node_id);
            if let Some(label) = node.label {
                labels.push(label);
            }
            current = node.parent;
        }
        labels.reverse();
        labels
    }

    /**
     * 直前のコードポイントの先頭バイトまでさかのぼる。
     *
     * たどったラベルを古い順に `output` に追加し、先頭バイトのノードを返す。
     * 先にルートに到達した場合はルートを返す。
     */
    pub fn get_prev_grapheme(
        &self,
        id: NodeId,
        alphabet: &Alphabet,
        output: &mut Vec<Label>,
    ) -> NodeId {
        let start = output.len();
        let mut current = id;
        loop {
            let node = self.node(current);
            let Some(label) = node.label else {
                break;
            };
            output.push(label);
            if byte_is_codepoint_boundary(alphabet.string_from_label(label)[0]) {
                break;
            }
            match node.parent {
                Some(parent) => current = parent,
                None => break,
            }
        }
        output[start..].reverse();
        current
    }

    /**
     * 直前の単語の先頭までさかのぼる。
     *
     * スペースまたはルートで止まり、そのノードを返す。止まったノード自体は `output` に含めない。
     */
    pub fn get_prev_word(&self, id: NodeId, space_label: Label, output: &mut Vec<Label>) -> NodeId {
        let start = output.len();
        let mut current = id;
        loop {
            let node = self.node(current);
            match node.label {
                None => break,
                Some(label) if label == space_label => break,
                Some(label) => {
                    output.push(label);
                    match node.parent {
                        Some(parent) => current = parent,
                        None => break,
                    }
                }
            }
        }
        output[start..].reverse();
        current
    }

    /**
     * 直近のコードポイント先頭バイトまでの距離 (自身を含むノード数) と、その先頭バイトを返す。
     *
     * # Panics
     * 先頭バイトを見つける前にルートに到達した場合。語彙とトライの構築上ありえない。
     */
    pub fn distance_to_codepoint_boundary(&self, id: NodeId, alphabet: &Alphabet) -> (usize, u8) {
        let mut distance = 1;
        let mut current = id;
        loop {
            let node = self.node(current);
            let Some(label) = node.label else {
                panic!("Reached root before finding a UTF-8 leading byte (node={current:?})");
            };
            let byte = alphabet.string_from_label(label)[0];
            if byte_is_codepoint_boundary(byte) {
                return (distance, byte);
            }
            match node.parent {
                Some(parent) if !self.is_root(parent) => {
                    current = parent;
                    distance += 1;
                }
                _ => panic!(
                    "Reached root before finding a UTF-8 leading byte (node={current:?})"
                ),
            }
        }
    }
}
