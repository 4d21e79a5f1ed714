//! Contract classifier: matches deployed contracts against NFT standards.
//!
//! A contract matches a standard when all three of these hold:
//! 1. every required init param (name + type) is present,
//! 2. every required field (name + type) is declared in source,
//! 3. every required transition has a counterpart with the same name, the
//!    same argument count and at least one identical argument.
//!
//! Source extraction sits behind [`SourceParser`]; [`PatternParser`] is a
//! line-oriented pattern matcher over Scilla source.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

use crate::types::{Contract, FieldDecl};
use crate::value::Param;

// ─── Source extraction ────────────────────────────────────────────────────────

/// The shape of a contract as declared in its source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceShape {
    /// Name of the first `contract` declaration.
    pub name: String,
    pub fields: Vec<FieldDecl>,
    /// Whitespace-normalised transition signatures.
    pub transitions: Vec<String>,
}

/// Extracts a [`SourceShape`] from contract source text.
pub trait SourceParser: Send + Sync {
    fn parse(&self, code: &str) -> SourceShape;
}

/// Pattern-based Scilla source parser.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternParser;

fn comment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)\(\*.*?\*\)").expect("valid regex"))
}

fn contract_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bcontract\s+(\w+)").expect("valid regex"))
}

fn field_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s*field\s+(\w+)\s*:\s*([^=\n]+?)\s*=").expect("valid regex"))
}

fn transition_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\btransition\s+(\w+)\s*\(").expect("valid regex"))
}

impl SourceParser for PatternParser {
    fn parse(&self, code: &str) -> SourceShape {
        let code = comment_re().replace_all(code, " ");

        let name = contract_re()
            .captures(&code)
            .map(|c| c[1].to_string())
            .unwrap_or_default();

        let fields = field_re()
            .captures_iter(&code)
            .map(|c| FieldDecl {
                name: c[1].to_string(),
                ty: normalize_type(&c[2]),
            })
            .collect();

        let transitions = transition_re()
            .captures_iter(&code)
            .filter_map(|c| {
                let whole = c.get(0)?;
                let args = balanced_args(&code[whole.end()..])?;
                Some(Signature::from_parts(&c[1], args).to_string())
            })
            .collect();

        SourceShape {
            name,
            fields,
            transitions,
        }
    }
}

/// Returns the text up to the `)` closing an already-open `(`.
fn balanced_args(rest: &str) -> Option<&str> {
    let mut depth = 1usize;
    for (i, ch) in rest.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&rest[..i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Splits on commas that are not nested inside parentheses.
fn split_top_level(args: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, ch) in args.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                out.push(&args[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(&args[start..]);
    out.into_iter().filter(|s| !s.trim().is_empty()).collect()
}

/// Collapse whitespace runs and trim inside parentheses.
pub fn normalize_type(ty: &str) -> String {
    ty.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace("( ", "(")
        .replace(" )", ")")
}

// ─── Signatures ───────────────────────────────────────────────────────────────

/// A transition signature: name plus `(arg, type)` pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub name: String,
    pub args: Vec<(String, String)>,
}

impl Signature {
    fn from_parts(name: &str, args: &str) -> Self {
        let args = split_top_level(args)
            .into_iter()
            .filter_map(|arg| {
                let (n, t) = arg.split_once(':')?;
                Some((n.trim().to_string(), normalize_type(t)))
            })
            .collect();
        Self {
            name: name.to_string(),
            args,
        }
    }

    /// Parse a signature of the form `Name(a: T, b: U)`.
    pub fn parse(sig: &str) -> Option<Self> {
        let (name, rest) = sig.split_once('(')?;
        let args = balanced_args(rest)?;
        Some(Self::from_parts(name.trim(), args))
    }

    /// Same name, same arity and at least one identical argument.
    pub fn loosely_matches(&self, other: &Signature) -> bool {
        if self.name != other.name || self.args.len() != other.args.len() {
            return false;
        }
        self.args.is_empty() || self.args.iter().any(|a| other.args.contains(a))
    }
}

impl std::fmt::Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let args: Vec<String> = self.args.iter().map(|(n, t)| format!("{n}: {t}")).collect();
        write!(f, "{}({})", self.name, args.join(", "))
    }
}

// ─── Standards ────────────────────────────────────────────────────────────────

/// The declared shape a token standard requires.
#[derive(Debug, Clone, Copy)]
pub struct StandardShape {
    pub name: &'static str,
    pub params: &'static [(&'static str, &'static str)],
    pub fields: &'static [(&'static str, &'static str)],
    pub transitions: &'static [&'static str],
}

/// ZRC-1: the original non-fungible token standard.
pub const ZRC1: StandardShape = StandardShape {
    name: "ZRC-1",
    params: &[
        ("contract_owner", "ByStr20"),
        ("name", "String"),
        ("symbol", "String"),
    ],
    fields: &[
        ("minters", "Map ByStr20 Dummy"),
        ("token_owners", "Map Uint256 ByStr20"),
        ("owned_token_count", "Map ByStr20 Uint256"),
        ("token_approvals", "Map Uint256 ByStr20"),
        ("operator_approvals", "Map ByStr20 (Map ByStr20 Bool)"),
        ("token_uris", "Map Uint256 String"),
        ("total_supply", "Uint256"),
        ("token_id_count", "Uint256"),
    ],
    transitions: &[
        "Mint(to: ByStr20, token_uri: String)",
        "Burn(token_id: Uint256)",
        "Transfer(to: ByStr20, token_id: Uint256)",
        "TransferFrom(to: ByStr20, token_id: Uint256)",
    ],
};

/// ZRC-6: the base-URI bearing standard with batch mint and burn.
pub const ZRC6: StandardShape = StandardShape {
    name: "ZRC-6",
    params: &[
        ("initial_contract_owner", "ByStr20"),
        ("initial_base_uri", "String"),
        ("name", "String"),
        ("symbol", "String"),
    ],
    fields: &[
        ("base_uri", "String"),
        ("token_owners", "Map Uint256 ByStr20"),
        ("balances", "Map ByStr20 Uint256"),
        ("total_supply", "Uint256"),
        ("token_id_count", "Uint256"),
        ("minters", "Map ByStr20 Unit"),
    ],
    transitions: &[
        "Mint(to: ByStr20, token_uri: String)",
        "BatchMint(to_token_uri_pair_list: List (Pair ByStr20 String))",
        "Burn(token_id: Uint256)",
        "BatchBurn(token_id_list: List Uint256)",
        "TransferFrom(to: ByStr20, token_id: Uint256)",
        "SetBaseURI(uri: String)",
    ],
};

impl StandardShape {
    /// Structural match against a contract's params, fields and transitions.
    pub fn matches(&self, contract: &Contract) -> bool {
        self.has_params(&contract.immutable_params)
            && self.has_fields(&contract.mutable_params)
            && self.has_transitions(&contract.transitions)
    }

    fn has_params(&self, params: &[Param]) -> bool {
        self.params.iter().all(|(name, ty)| {
            params
                .iter()
                .any(|p| p.vname == *name && normalize_type(&p.ty) == *ty)
        })
    }

    fn has_fields(&self, fields: &[FieldDecl]) -> bool {
        self.fields
            .iter()
            .all(|(name, ty)| fields.iter().any(|f| f.name == *name && f.ty == *ty))
    }

    fn has_transitions(&self, transitions: &[String]) -> bool {
        let declared: Vec<Signature> = transitions.iter().filter_map(|t| Signature::parse(t)).collect();
        self.transitions.iter().all(|required| {
            Signature::parse(required)
                .map(|req| declared.iter().any(|d| req.loosely_matches(d)))
                .unwrap_or(false)
        })
    }
}

// ─── Classifier ───────────────────────────────────────────────────────────────

/// Addresses known to be ZRC-1 even though their source does not match.
///
/// Consulted before structural matching.
#[derive(Debug, Clone, Default)]
pub struct OverrideTable {
    zrc1: HashSet<String>,
}

impl OverrideTable {
    pub fn new<I, S>(zrc1: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            zrc1: zrc1
                .into_iter()
                .map(|a| a.as_ref().to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn is_zrc1(&self, contract: &Contract) -> bool {
        self.zrc1.contains(&contract.address.to_ascii_lowercase())
            || self.zrc1.contains(&contract.address_bech32.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.zrc1.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zrc1.is_empty()
    }
}

/// Which standards a contract matched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Classification {
    pub zrc1: bool,
    pub zrc6: bool,
}

/// Classifies contracts against ZRC-1 and ZRC-6.
#[derive(Debug, Clone, Default)]
pub struct Classifier {
    overrides: OverrideTable,
}

impl Classifier {
    pub fn new(overrides: OverrideTable) -> Self {
        Self { overrides }
    }

    /// Evaluate both standards independently.
    pub fn classify(&self, contract: &Contract) -> Classification {
        Classification {
            zrc1: self.overrides.is_zrc1(contract) || ZRC1.matches(contract),
            zrc6: ZRC6.matches(contract),
        }
    }

    /// Classify and write the flags onto the contract.
    pub fn apply(&self, contract: &mut Contract) -> Classification {
        let c = self.classify(contract);
        contract.zrc1 = c.zrc1;
        contract.zrc6 = c.zrc6;
        c
    }
}

/// Fill a contract's name, fields and transitions from its source.
pub fn apply_source(contract: &mut Contract, parser: &dyn SourceParser) {
    let shape = parser.parse(&contract.code);
    contract.name = shape.name;
    contract.mutable_params = shape.fields;
    contract.transitions = shape.transitions;
}
