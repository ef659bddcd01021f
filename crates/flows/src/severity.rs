//! Keyword-based severity classification.
//!
//! Urgent patterns describe situations that need emergency services right
//! now (chest pain, not breathing, suicidal intent). Elevated patterns
//! describe symptoms worth seeing a clinician about soon.

use healthflow_core::severity::{Severity, SeverityClassifier};
use regex_lite::Regex;
use tracing::warn;

// Input is lowercased before matching, so non-ASCII letters in these
// patterns are written in lowercase.
const URGENT_PATTERNS: &[&str] = &[
    // en
    r"chest\s+(?:pain|tightness|pressure)",
    r"can(?:'|’|no)?t\s+breathe?",
    r"(?:trouble|difficulty|struggling)\s+breathing",
    r"short(?:ness)?\s+of\s+breath",
    r"not\s+breathing",
    r"unconscious|passed\s+out|unresponsive",
    r"severe\s+bleeding|bleeding\s+(?:heavily|a\s+lot)|won'?t\s+stop\s+bleeding",
    r"stroke|face\s+(?:is\s+)?drooping|slurred\s+speech",
    r"seizure|convuls",
    r"overdose|overdosed",
    r"anaphyla|throat\s+(?:is\s+)?(?:closing|swelling)",
    r"suicid|kill\s+myself|end\s+my\s+life|want\s+to\s+die|hurt\s+myself|self[-\s]?harm",
    // es
    r"dolor\s+(?:en\s+el\s+|de\s+)?pecho|opresi[oó]n\s+en\s+el\s+pecho",
    r"no\s+puedo\s+respirar|dificultad\s+para\s+respirar|me\s+falta\s+(?:el\s+)?aire",
    r"inconsciente|no\s+responde",
    r"sangrado\s+(?:abundante|fuerte|que\s+no\s+para)|derrame\s+cerebral|sobredosis",
    r"quitarme\s+la\s+vida|matarme|quiero\s+morir|hacerme\s+daño|autolesi",
    // fr
    r"douleurs?\s+(?:à|a)\s+la\s+poitrine|douleurs?\s+thoracique|oppression\s+thoracique",
    r"n['’]arrive\s+(?:pas|plus)\s+(?:à|a)\s+respirer|ne\s+peux\s+(?:pas|plus)\s+respirer",
    r"difficult[ée]s?\s+(?:à|a)\s+respirer",
    r"inconscient|ne\s+r[ée]agit\s+plus",
    r"h[ée]morragie|saigne\s+beaucoup|crise\s+d['’][ée]pilepsie|surdose",
    r"me\s+tuer|mettre\s+fin\s+(?:à|a)\s+mes\s+jours|envie\s+de\s+mourir|me\s+faire\s+du\s+mal",
    // de
    r"brustschmerz|schmerzen\s+in\s+der\s+brust|engegef[üu]hl\s+in\s+der\s+brust",
    r"kann\s+nicht\s+(?:mehr\s+)?atmen|atemnot|bekomme\s+keine\s+luft",
    r"bewusstlos|ohnm[äa]chtig",
    r"starke\s+blutung|blutet\s+stark|krampfanfall|schlaganfall|[üu]berdosis",
    r"suizid|selbstmord|mich\s+umbringen|nicht\s+mehr\s+leben|mir\s+etwas\s+antun|selbstverletz",
    // hi
    r"सीने\s+में\s+दर्द|छाती\s+में\s+दर्द",
    r"सा[ँं]स\s+नहीं\s+ले|सा[ँं]स\s+लेने\s+में\s+(?:तकलीफ|दिक्कत)",
    r"बेहोश",
    r"आत्महत्या|खुद\s+को\s+(?:मार|नुकसान)|मरना\s+चाहत",
];

const ELEVATED_PATTERNS: &[&str] = &[
    // en
    r"high\s+fever|fever\s+(?:of\s+)?(?:10[3-9]|3[9]|4[0-2])",
    r"severe|intense|unbearable|worst",
    r"vomit(?:ing)?\s+blood|blood\s+in\s+(?:my\s+)?(?:stool|urine)",
    r"dizz(?:y|iness)|faint(?:ed|ing)?",
    r"for\s+(?:over\s+|more\s+than\s+)?(?:a\s+week|\d+\s+(?:days|weeks))",
    r"getting\s+worse|worsening",
    r"hopeless|panic\s+attack",
    // es
    r"fiebre\s+(?:muy\s+)?alta|fiebre\s+de\s+(?:39|4[0-2])",
    r"(?:fuerte|intenso|insoportable)|vomitando\s+sangre",
    r"mareo|mareado|mareada",
    r"desde\s+hace\s+(?:m[áa]s\s+de\s+)?(?:una\s+semana|\d+\s+(?:d[íi]as|semanas))",
    r"empeorando|cada\s+vez\s+peor",
    r"desesperanza|sin\s+esperanza|ataque\s+de\s+p[áa]nico",
    // fr
    r"forte\s+fi[èe]vre|fi[èe]vre\s+(?:de\s+)?(?:39|4[0-2])",
    r"insupportable|violente?s?\s+douleur|douleur\s+violente",
    r"vertiges?|[ée]tourdi",
    r"depuis\s+(?:plus\s+d['’]une\s+semaine|\d+\s+(?:jours|semaines))",
    r"s['’]aggrave|de\s+pire\s+en\s+pire",
    r"d[ée]sesp[ée]r|(?:crise|attaque)\s+de\s+panique",
    // de
    r"hohes\s+fieber|fieber\s+(?:von\s+)?(?:39|4[0-2])",
    r"starke[n]?\s+schmerz|unertr[äa]glich",
    r"schwindel",
    r"seit\s+(?:[üu]ber\s+)?(?:einer\s+woche|\d+\s+(?:tagen|wochen))",
    r"wird\s+(?:immer\s+)?schlimmer|verschlechter",
    r"hoffnungslos|panikattacke",
    // hi
    r"तेज़?\s+बुखार",
    r"चक्कर",
    r"बहुत\s+तेज़?\s+दर्द",
    r"निराश|घबराहट\s+का\s+दौरा",
];

/// Regex keyword classifier. Patterns that fail to compile are skipped.
pub struct KeywordSeverityClassifier {
    urgent: Vec<Regex>,
    elevated: Vec<Regex>,
}

impl KeywordSeverityClassifier {
    pub fn new(urgent: &[&str], elevated: &[&str]) -> Self {
        Self {
            urgent: compile(urgent),
            elevated: compile(elevated),
        }
    }
}

impl Default for KeywordSeverityClassifier {
    fn default() -> Self {
        Self::new(URGENT_PATTERNS, ELEVATED_PATTERNS)
    }
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| match Regex::new(&format!("(?i){p}")) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!(pattern = p, error = %e, "Skipping invalid severity pattern");
                None
            }
        })
        .collect()
}

impl SeverityClassifier for KeywordSeverityClassifier {
    fn name(&self) -> &str {
        "keyword"
    }

    fn classify(&self, text: &str) -> Severity {
        let text = text.to_lowercase();
        if self.urgent.iter().any(|re| re.is_match(&text)) {
            Severity::Urgent
        } else if self.elevated.iter().any(|re| re.is_match(&text)) {
            Severity::Elevated
        } else {
            Severity::Low
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(text: &str) -> Severity {
        KeywordSeverityClassifier::default().classify(text)
    }

    #[test]
    fn chest_pain_and_breathing_is_urgent() {
        assert_eq!(classify("I have chest pain and can't breathe"), Severity::Urgent);
        assert_eq!(classify("I CANNOT BREATHE"), Severity::Urgent);
        assert_eq!(classify("i can’t breathe properly"), Severity::Urgent);
    }

    #[test]
    fn crisis_language_is_urgent() {
        assert_eq!(classify("Some days I want to end my life"), Severity::Urgent);
        assert_eq!(classify("thinking about suicide"), Severity::Urgent);
    }

    #[test]
    fn lingering_or_severe_symptoms_are_elevated() {
        assert_eq!(classify("severe headache since this morning"), Severity::Elevated);
        assert_eq!(classify("cough for 3 weeks"), Severity::Elevated);
        assert_eq!(classify("feeling dizzy when I stand"), Severity::Elevated);
    }

    #[test]
    fn spanish_urgent_and_elevated() {
        assert_eq!(classify("Tengo dolor en el pecho, no puedo respirar"), Severity::Urgent);
        assert_eq!(classify("A veces quiero quitarme la vida"), Severity::Urgent);
        assert_eq!(classify("Estoy muy mareada desde ayer"), Severity::Elevated);
        assert_eq!(classify("¿Cuánta agua debo beber?"), Severity::Low);
    }

    #[test]
    fn french_urgent_and_elevated() {
        assert_eq!(classify("J'ai une douleur à la poitrine et je n'arrive pas à respirer"), Severity::Urgent);
        assert_eq!(classify("J’ai envie de mourir"), Severity::Urgent);
        assert_eq!(classify("Forte fièvre depuis hier"), Severity::Elevated);
        assert_eq!(classify("Combien d'eau faut-il boire ?"), Severity::Low);
    }

    #[test]
    fn german_urgent_and_elevated() {
        assert_eq!(classify("Ich habe Brustschmerzen und Atemnot"), Severity::Urgent);
        assert_eq!(classify("Ich denke an Selbstmord"), Severity::Urgent);
        assert_eq!(classify("Mir ist ständig SCHWINDELIG"), Severity::Elevated);
        assert_eq!(classify("Wie viel Wasser soll ich trinken?"), Severity::Low);
    }

    #[test]
    fn hindi_urgent_and_elevated() {
        assert_eq!(classify("मेरे सीने में दर्द है और साँस नहीं ले पा रहा"), Severity::Urgent);
        assert_eq!(classify("मैं आत्महत्या के बारे में सोच रहा हूँ"), Severity::Urgent);
        assert_eq!(classify("कल से तेज़ बुखार है"), Severity::Elevated);
        assert_eq!(classify("मुझे कितना पानी पीना चाहिए?"), Severity::Low);
    }

    #[test]
    fn builtin_patterns_all_compile() {
        let classifier = KeywordSeverityClassifier::default();
        assert_eq!(classifier.urgent.len(), URGENT_PATTERNS.len());
        assert_eq!(classifier.elevated.len(), ELEVATED_PATTERNS.len());
    }

    #[test]
    fn everyday_questions_are_low() {
        assert_eq!(classify("How much water should I drink?"), Severity::Low);
        assert_eq!(classify("mild runny nose"), Severity::Low);
    }

    #[test]
    fn invalid_patterns_are_skipped() {
        let classifier = KeywordSeverityClassifier::new(&["(unclosed", "pain"], &[]);
        assert_eq!(classifier.classify("back pain"), Severity::Urgent);
    }
}
