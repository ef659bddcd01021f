//! Canonical per-locale texts: disclaimers, apologies, and emergency advice.
//!
//! Locales arrive in whatever form the caller uses (`"en"`, `"es-MX"`,
//! `"English"`), so lookups go through [`language_code`] first. Anything
//! unrecognised falls back to English.

pub const DEFAULT_LANGUAGE: &str = "en";

struct Texts {
    code: &'static str,
    names: &'static [&'static str],
    disclaimer: &'static str,
    apology: &'static str,
    backend_error: &'static str,
    emergency_advice: &'static str,
}

const TEXTS: &[Texts] = &[
    Texts {
        code: "en",
        names: &["english"],
        disclaimer: "This information is for general educational purposes only and is not a substitute for professional medical advice.",
        apology: "Sorry, I could not process your request in the expected format. Please try rephrasing your question.",
        backend_error: "The assistant is temporarily unavailable. Please try again in a few minutes.",
        emergency_advice: "This may be a medical emergency. Call your local emergency number (such as 911 or 112) or go to the nearest emergency department now.",
    },
    Texts {
        code: "es",
        names: &["spanish", "español", "espanol"],
        disclaimer: "Esta información tiene fines educativos generales y no sustituye el consejo médico profesional.",
        apology: "Lo siento, no pude procesar tu solicitud en el formato esperado. Intenta reformular tu pregunta.",
        backend_error: "El asistente no está disponible temporalmente. Inténtalo de nuevo en unos minutos.",
        emergency_advice: "Esto puede ser una emergencia médica. Llama ahora a tu número local de emergencias (como 911 o 112) o acude al servicio de urgencias más cercano.",
    },
    Texts {
        code: "fr",
        names: &["french", "français", "francais"],
        disclaimer: "Ces informations sont fournies à titre éducatif uniquement et ne remplacent pas un avis médical professionnel.",
        apology: "Désolé, je n'ai pas pu traiter votre demande dans le format attendu. Veuillez reformuler votre question.",
        backend_error: "L'assistant est temporairement indisponible. Veuillez réessayer dans quelques minutes.",
        emergency_advice: "Il peut s'agir d'une urgence médicale. Appelez immédiatement le numéro d'urgence local (par exemple le 112 ou le 15) ou rendez-vous aux urgences les plus proches.",
    },
    Texts {
        code: "de",
        names: &["german", "deutsch"],
        disclaimer: "Diese Informationen dienen nur der allgemeinen Aufklärung und ersetzen keine professionelle medizinische Beratung.",
        apology: "Entschuldigung, Ihre Anfrage konnte nicht im erwarteten Format verarbeitet werden. Bitte formulieren Sie Ihre Frage neu.",
        backend_error: "Der Assistent ist vorübergehend nicht verfügbar. Bitte versuchen Sie es in einigen Minuten erneut.",
        emergency_advice: "Dies könnte ein medizinischer Notfall sein. Rufen Sie sofort den Notruf (zum Beispiel 112) an oder suchen Sie die nächste Notaufnahme auf.",
    },
    Texts {
        code: "hi",
        names: &["hindi", "हिन्दी", "हिंदी"],
        disclaimer: "यह जानकारी केवल सामान्य शैक्षिक उद्देश्यों के लिए है और पेशेवर चिकित्सा सलाह का विकल्प नहीं है।",
        apology: "क्षमा करें, आपके अनुरोध को अपेक्षित प्रारूप में संसाधित नहीं किया जा सका। कृपया अपना प्रश्न दोबारा लिखें।",
        backend_error: "सहायक अस्थायी रूप से उपलब्ध नहीं है। कृपया कुछ मिनट बाद पुनः प्रयास करें।",
        emergency_advice: "यह एक चिकित्सा आपात स्थिति हो सकती है। तुरंत अपने स्थानीय आपातकालीन नंबर (जैसे 112) पर कॉल करें या निकटतम आपातकालीन विभाग में जाएँ।",
    },
];

fn texts(locale: Option<&str>) -> &'static Texts {
    let code = locale.map(language_code).unwrap_or(DEFAULT_LANGUAGE);
    TEXTS
        .iter()
        .find(|t| t.code == code)
        .unwrap_or(&TEXTS[0])
}

/// Normalise a locale tag or language name to a supported language code.
///
/// `"es-MX"`, `"ES_mx"` and `"Spanish"` all map to `"es"`; unknown input maps
/// to [`DEFAULT_LANGUAGE`].
pub fn language_code(locale: &str) -> &'static str {
    let lowered = locale.trim().to_lowercase();
    let primary = lowered.split(['-', '_']).next().unwrap_or_default();
    TEXTS
        .iter()
        .find(|t| t.code == primary || t.names.contains(&lowered.as_str()))
        .map(|t| t.code)
        .unwrap_or(DEFAULT_LANGUAGE)
}

/// Whether the locale has its own canonical texts.
pub fn is_supported(locale: &str) -> bool {
    let lowered = locale.trim().to_lowercase();
    let primary = lowered.split(['-', '_']).next().unwrap_or_default();
    TEXTS
        .iter()
        .any(|t| t.code == primary || t.names.contains(&lowered.as_str()))
}

/// The canonical safety disclaimer for a locale.
pub fn canonical_disclaimer(locale: Option<&str>) -> &'static str {
    texts(locale).disclaimer
}

/// The "could not process your request" apology for a locale.
pub fn apology(locale: Option<&str>) -> &'static str {
    texts(locale).apology
}

/// The sentence shown when the fallback backend cannot be reached.
pub fn backend_error(locale: Option<&str>) -> &'static str {
    texts(locale).backend_error
}

/// Default emergency advice for a locale.
pub fn emergency_advice(locale: Option<&str>) -> &'static str {
    texts(locale).emergency_advice
}
