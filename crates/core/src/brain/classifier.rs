//! Utterance classification: pass through, or take over with a category.

use crate::provider::names;
use regex::Regex;
use std::sync::LazyLock;

/// What kind of answer the orchestrator computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Workspace,
    Weather,
    Location,
    Navigation,
    Image,
    Video,
    Code,
    Document,
    Camera,
    Search,
}

impl Category {
    /// Providers the answer for this category may call, in call order.
    pub fn providers(self) -> &'static [&'static str] {
        match self {
            Category::Workspace => &[],
            Category::Weather => &[names::GEOLOCATE, names::WEATHER, names::WEB_SEARCH],
            Category::Location => &[names::GEOLOCATE, names::REVERSE_GEOCODE],
            Category::Navigation => &[names::GEOLOCATE, names::WEB_SEARCH],
            Category::Image => &[names::GENERATE_IMAGE],
            Category::Video => &[names::GENERATE_VIDEO],
            Category::Code => &[names::EXECUTE_CODE],
            Category::Document => &[names::OPEN_DOCUMENT],
            Category::Camera => &[],
            Category::Search => &[names::WEB_SEARCH],
        }
    }

    /// Whether the answer depends on the user's position.
    pub fn needs_location(self) -> bool {
        matches!(
            self,
            Category::Weather | Category::Location | Category::Navigation
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Workspace => "workspace",
            Category::Weather => "weather",
            Category::Location => "location",
            Category::Navigation => "navigation",
            Category::Image => "image",
            Category::Video => "video",
            Category::Code => "code",
            Category::Document => "document",
            Category::Camera => "camera",
            Category::Search => "search",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Leave the turn to the remote model.
    PassThrough,
    Takeover(Category),
}

// Patterns run against folded text: lowercase, Romanian diacritics removed.
static GREETING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(buna|salut|hello|hi|hey|seara|dimineata|ziua|noapte)\b").expect("valid regex")
});

static COURTESY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(ce faci|cum esti|how are( you)?|multumesc|mersi|thanks|thank you|ok|okay|da|nu|pa|bye|la revedere|good|bine|super|perfect|gata)\W*$",
    )
    .expect("valid regex")
});

static NEEDS_LOOKUP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"vreme|weather|grade|temperatura|cauta|search|find|gaseste|unde e|where is|distanta|distance|cat de|how far|how much|cine e|who is|ce este|what is|\bpret|\bprice|stiri|news|\binfo|spune-mi despre|arata-mi|show me|afla|lidl|tesco|magazin|shop|\bora\b|\btime\b|\bdata\b|\bdate\b",
    )
    .expect("valid regex")
});

static RULES: LazyLock<Vec<(Category, Regex)>> = LazyLock::new(|| {
    [
        (Category::Workspace, r"zona de lucru|workspace"),
        (
            Category::Weather,
            r"vreme|grade|temperatur|afara|ploaie|weather|degrees|forecast",
        ),
        (
            Category::Location,
            r"unde (ma aflu|sunt)|locati|where am i|my location|\bgps\b",
        ),
        (
            Category::Navigation,
            r"distanta|distance|cat e pana|how far|du-ma|take me|navighe|navigate|\bruta|\broute|lidl|tesco|magazin|\bshop",
        ),
        (
            Category::Image,
            r"deseneaza|genereaza (o )?imagin|creeaza (o )?poz|fa-mi (o )?poza|\bdraw\b|create (an? )?image|generate (an? )?image|make (a )?picture|imagine cu|poza cu",
        ),
        (
            Category::Video,
            r"(genereaza|creeaza|fa-mi|fa) (un )?(video|clip|filmulet)|(generate|create|make) (a |an )?(video|clip|animation)|\bvideo (cu|of|about|despre)\b|animatie",
        ),
        (
            Category::Code,
            r"python|\bcod(ul)?\b|\bcode\b|\bscript|\bprogram|executa|run code",
        ),
        (
            Category::Document,
            r"document|\bword\b|excel|\bpdf\b|powerpoint|\bppt\b|fisier|\bfile\b|upload|incarca|deschide|open file|editeaza|citeste|\bread\b|vizualizeaza|\bview\b",
        ),
        (
            Category::Camera,
            r"microscop|scaneaz|\bscan\b|\bcamera\b|webcam|\busb\b|captur|\bpoza\b|fotografi|inregistreaz|\brecord",
        ),
    ]
    .into_iter()
    .map(|(category, pattern)| (category, Regex::new(pattern).expect("valid regex")))
    .collect()
});

/// Lowercases and strips the Romanian diacritics the patterns are written without.
pub fn fold(text: &str) -> String {
    text.trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'ă' | 'â' => 'a',
            'î' => 'i',
            'ș' | 'ş' => 's',
            'ț' | 'ţ' => 't',
            other => other,
        })
        .collect()
}

/// Ordered first-match-wins classifier.
///
/// Greetings and courtesy phrases always pass through. Otherwise the utterance
/// is taken over only if it looks like it needs a lookup, and the first
/// matching category wins, with web search as the fallback.
#[derive(Debug, Clone, Copy, Default)]
pub struct Classifier;

impl Classifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, utterance: &str) -> Decision {
        let text = fold(utterance);
        if text.is_empty() || GREETING.is_match(&text) || COURTESY.is_match(&text) {
            return Decision::PassThrough;
        }

        let category = RULES
            .iter()
            .find(|(_, pattern)| pattern.is_match(&text))
            .map(|(category, _)| *category);

        match category {
            Some(category) => Decision::Takeover(category),
            None if NEEDS_LOOKUP.is_match(&text) => Decision::Takeover(Category::Search),
            None => Decision::PassThrough,
        }
    }
}
