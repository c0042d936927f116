//! Instruction templates for every completion feature.
//!
//! Everything here is a pure function of its inputs: the same arguments
//! always render the same text. The ranked-guess and analysis templates
//! dictate the exact output shapes that `parse` expects, so changes to one
//! side must be mirrored on the other.

pub const SYSTEM_PROMPT: &str = "You are an mbti expert.";

/// Fixed user-visible text substituted whenever a completion fails.
pub const APOLOGY: &str = "Sorry, an error occurred while processing your request.";

pub fn interpret(type_code: &str, message: &str) -> String {
    format!(
        "Determine if the following message: \"{message}\" Reflects the traits of {type_code}. \
         If so, explain how this message reflects the traits of an {type_code}. \
         And then interpret the message, which part of the message reflects traits of {type_code} and why. \
         If it does not reflect the traits of {type_code}, say which mbti traits the message reflects, and why. \
         Be confident and assertive in your tone."
    )
}

pub fn translate(source: &str, target: &str, message: &str) -> String {
    format!(
        "The following message was written by an {source}: \"{message}\". \
         Rewrite it so that an {target} would naturally relate to it, keeping the meaning intact. \
         After the rewritten message, briefly note which {source} traits you softened or amplified for the {target} reader. \
         Be confident and assertive in your tone."
    )
}

fn ranked_format_contract() -> &'static str {
    "List your top guesses, at most three, from most to least likely. Format each guess exactly as:\n\
     1. CODE - NN%\n\
     Reasoning: why the writing points to that type.\n\
     Use the four-letter MBTI code, an integer percentage, and nothing else on the ranked line."
}

pub fn guess(message: &str) -> String {
    format!(
        "Guess the MBTI personality type of the person who wrote the following message: \"{message}\". {}",
        ranked_format_contract()
    )
}

pub fn guess_image_instruction() -> String {
    format!(
        "The attached image was chosen or created by one person. Guess that person's MBTI personality type from what the image shows. {}",
        ranked_format_contract()
    )
}

/// System instruction for one adaptive interview session.
///
/// The contract the interview depends on: exactly one open-ended question
/// per reply, a topic announced with the literal lead-in sentence, and the
/// literal termination phrase once the model has learned enough.
pub fn interview_instruction(name: &str, excluded_topics: &[String]) -> String {
    let exclusions = if excluded_topics.is_empty() {
        "No topics are off limits yet.".to_string()
    } else {
        format!(
            "You have already explored these topics with {name} in earlier sessions, so do not pick them again: {}.",
            excluded_topics.join(", ")
        )
    };
    format!(
        "You are conducting an adaptive personality interview with {name} to determine their MBTI type. \
         Ask exactly one open-ended question per reply, and nothing else. \
         When you start a new topic, announce it with the sentence \"The topic I would like to explore with you today is: <topic>.\" \
         {exclusions} \
         Keep questions warm and conversational, and build each one on what {name} has already shared. \
         Once you are confident you have learned enough, end the session by replying with exactly: \
         \"{phrase}\"",
        phrase = termination_phrase(name),
    )
}

/// The literal closing sentence the interview watches for.
pub fn termination_phrase(name: &str) -> String {
    format!("Thank you for sharing, {name}. Our session is now complete.")
}

pub fn analysis_instruction(name: &str) -> String {
    format!(
        "The following is the complete transcript of a personality interview with {name}. \
         Determine {name}'s MBTI type from their answers. Respond in exactly this shape:\n\
         MBTI Type: XXXX\n\
         Confidence: NN%\n\
         Explanation: a paragraph explaining which answers pointed to each letter of the type."
    )
}

pub fn summarize_transcript(subject: &str) -> String {
    format!(
        "Condense the following interview transcript with {subject} into a short paragraph that \
         preserves every personality-relevant detail and drops everything else."
    )
}

pub fn combined_report(name: &str, dominant_type: &str, confidence: f64) -> String {
    format!(
        "Across their interview history, {name} most frequently presented as {dominant_type} \
         ({confidence:.2}% of sessions). Using the session material below, write a single combined \
         personality report for {name}: their likely type, how consistently they present it, and \
         what stood out across sessions. Be confident and assertive in your tone."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpret_embeds_message_and_code() {
        let prompt = interpret("INTJ", "I plan everything.");
        assert!(prompt.contains("\"I plan everything.\""));
        assert!(prompt.contains("traits of INTJ"));
    }

    #[test]
    fn interview_instruction_lists_exclusions() {
        let topics = vec!["Childhood memories".to_string(), "Work".to_string()];
        let prompt = interview_instruction("Alex", &topics);
        assert!(prompt.contains("Childhood memories, Work"));
        assert!(prompt.contains("Thank you for sharing, Alex. Our session is now complete."));
        assert!(prompt.contains("exactly one open-ended question"));
    }

    #[test]
    fn interview_instruction_without_history() {
        let prompt = interview_instruction("Alex", &[]);
        assert!(prompt.contains("No topics are off limits yet."));
    }

    #[test]
    fn termination_phrase_is_literal() {
        assert_eq!(
            termination_phrase("Alex"),
            "Thank you for sharing, Alex. Our session is now complete."
        );
    }

    #[test]
    fn guess_demands_ranked_shape() {
        let prompt = guess("hello there");
        assert!(prompt.contains("1. CODE - NN%"));
        assert!(prompt.contains("Reasoning:"));
    }
}
